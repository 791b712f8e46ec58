//! firewall-anomaly-detector binary entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use firewall_anomaly_detector::config::{ConfigLoader, DetectorConfig};
use firewall_anomaly_detector::engine::AnomalyEngine;
use firewall_anomaly_detector::logging::init_logging;
use firewall_anomaly_detector::pipeline::{
    self, DecisionSink, DetectorService, JsonLinesSink, LinesSource, RecordSource,
    TracingSink,
};

const REPLAY_BATCH_SIZE: usize = 1000;

#[derive(Parser)]
#[command(name = "firewall-anomaly-detector")]
#[command(about = "Sliding-window anomaly detection for firewall logs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "FAD_CONFIG")]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume records and publish decisions until interrupted
    Run {
        #[arg(long, value_enum, default_value_t = SourceKind::Stdin)]
        source: SourceKind,

        /// Where decisions go: JSON lines on stdout, or the log only
        #[arg(long, value_enum, default_value_t = SinkKind::Stdout)]
        sink: SinkKind,
    },

    /// Validate the configuration and print the effective settings
    CheckConfig,

    /// Replay a JSON lines file in event time
    Replay {
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Stdin,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    Stdout,
    Log,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run_cli(cli).await {
        error!(error = %e, "fatal");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::new()
        .load_from_file(cli.config.as_deref())
        .load_from_env()
        .build()?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if let Commands::CheckConfig = cli.command {
        print!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let _guard = init_logging(&config.logging)?;
    let engine = Arc::new(AnomalyEngine::new(&config)?);

    match cli.command {
        Commands::Run { source, sink } => {
            run_service(&config, Arc::clone(&engine), source, sink).await?
        }
        Commands::Replay { file } => replay_file(&config, &engine, &file).await?,
        Commands::CheckConfig => {}
    }

    let snapshot = engine.metrics().snapshot();
    info!(
        processed = snapshot.processed_logs,
        windows = snapshot.windows_created,
        decisions = snapshot.decisions_emitted,
        anomalies = snapshot.anomalies_detected,
        dropped = snapshot.records_dropped,
        malformed = snapshot.malformed_records,
        "final counters"
    );
    Ok(())
}

async fn run_service(
    config: &DetectorConfig,
    engine: Arc<AnomalyEngine>,
    source_kind: SourceKind,
    sink_kind: SinkKind,
) -> Result<()> {
    let source = open_source(config, source_kind).await?;
    let sink: Arc<dyn DecisionSink> = match sink_kind {
        SinkKind::Stdout => Arc::new(JsonLinesSink::stdout(config.kafka.clone())),
        SinkKind::Log => Arc::new(TracingSink::new(config.kafka.clone())),
    };
    let service = DetectorService::from_config(config, engine, sink);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
            shutdown.cancel();
        }
    });

    let summary = service.run(source, cancel).await?;
    info!(?summary, "run finished");
    Ok(())
}

async fn open_source(config: &DetectorConfig, kind: SourceKind) -> Result<Box<dyn RecordSource>> {
    match kind {
        SourceKind::Stdin => Ok(Box::new(LinesSource::stdin(config.redis.batch_size))),
        #[cfg(feature = "redis-backend")]
        SourceKind::Redis => Ok(Box::new(
            pipeline::RedisListSource::connect(&config.redis).await?,
        )),
        #[cfg(not(feature = "redis-backend"))]
        SourceKind::Redis => {
            anyhow::bail!("redis source requires the `redis-backend` feature")
        }
    }
}

async fn replay_file(config: &DetectorConfig, engine: &AnomalyEngine, path: &Path) -> Result<()> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut source = LinesSource::new(
        BufReader::new(file),
        REPLAY_BATCH_SIZE,
        path.display().to_string(),
    );

    let report = pipeline::replay(engine, &mut source).await?;
    let sink = JsonLinesSink::stdout(config.kafka.clone());
    for decision in &report.decisions {
        sink.publish(decision).await?;
    }
    sink.flush().await?;
    Ok(())
}
