use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

use crate::error::{Error, Result};

/// Main detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DetectorConfig {
    /// Duration of the sliding time window in seconds (at most one year)
    #[validate(range(min = 1, max = 31_536_000))]
    pub window_seconds: u64,

    /// Threshold for anomaly detection (0.0 to 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    pub score_threshold: f64,

    /// Path to the pre-trained model file, reported at startup
    pub model_path: String,

    /// Per log source configuration, keyed by source key
    pub sources: HashMap<String, SourceConfig>,

    /// Window lifecycle policies
    #[validate(nested)]
    pub window: WindowConfig,

    /// Scoring policy selection
    pub scorer: ScorerConfig,

    /// Redis record source
    pub redis: RedisConfig,

    /// Output topics
    pub kafka: KafkaConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Per-source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Metric field to extract from logs for this source
    #[serde(default = "default_metric")]
    pub metric: String,
}

fn default_metric() -> String {
    "connection_count".to_string()
}

/// Window lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WindowConfig {
    /// How late timestamps affect the window end
    pub boundary: WindowBoundary,

    /// Reference mean used for percent change
    pub baseline: BaselinePolicy,

    /// Number of independently locked store partitions
    #[validate(range(min = 1, max = 1024))]
    pub shards: usize,

    /// Idle sweep period in seconds. Unset means one sweep per window
    /// duration; 0 disables the sweeper
    pub sweep_interval_seconds: Option<u64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            boundary: WindowBoundary::GapExtension,
            baseline: BaselinePolicy::PreviousWindow,
            shards: 1,
            sweep_interval_seconds: None,
        }
    }
}

/// Window boundary semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowBoundary {
    /// A sample later than the window end pushes the end to `timestamp + duration`
    GapExtension,
    /// Windows start on a fixed grid and the end never moves
    Tumbling,
}

/// Baseline carried into a new window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Always compare against zero (percent change is always 0)
    Zero,
    /// Compare against the mean of the previous flushed window for the same source
    PreviousWindow,
}

/// Scorer selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScorerConfig {
    /// Additive threshold heuristic
    Heuristic,
    /// HTTP classifier endpoint receiving the feature vector
    External {
        endpoint: String,
        #[serde(default = "default_scorer_timeout")]
        timeout_seconds: u64,
    },
}

fn default_scorer_timeout() -> u64 {
    5
}

impl Default for ScorerConfig {
    fn default() -> Self {
        ScorerConfig::Heuristic
    }
}

/// Redis list source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis server address
    pub address: String,
    /// Redis password
    pub password: Option<String>,
    /// Redis database number
    pub db: i64,
    /// Redis list key containing firewall logs
    pub key: String,
    /// Maximum entries popped per batch
    pub batch_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: None,
            db: 0,
            key: "firewall_logs".to_string(),
            batch_size: 500,
        }
    }
}

impl RedisConfig {
    /// redis:// 接続URLを組み立てる
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}/{}", password, self.address, self.db)
            }
            _ => format!("redis://{}/{}", self.address, self.db),
        }
    }
}

/// Output topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// List of Kafka/Redpanda broker addresses
    pub brokers: Vec<String>,
    /// Topic for anomalous events
    pub anomaly_topic: String,
    /// Topic for normal events
    pub normal_topic: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            anomaly_topic: "firewall-anomalies".to_string(),
            normal_topic: "firewall-normal".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Console output format
    pub format: LogFormat,
    /// Optional log file; rotated per `rotation`
    pub file: Option<PathBuf>,
    /// File rotation
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            file: None,
            rotation: LogRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let mut sources = HashMap::new();
        sources.insert(
            "fortinet.firewall".to_string(),
            SourceConfig {
                metric: "connection_count".to_string(),
            },
        );
        sources.insert(
            "paloalto.firewall".to_string(),
            SourceConfig {
                metric: "bytes_sent".to_string(),
            },
        );

        Self {
            window_seconds: 60,
            score_threshold: 0.7,
            model_path: "/etc/plugin/model.pkl".to_string(),
            sources,
            window: WindowConfig::default(),
            scorer: ScorerConfig::default(),
            redis: RedisConfig::default(),
            kafka: KafkaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// ウィンドウ長
    pub fn window_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds as i64)
    }

    /// 放置ウィンドウの掃除間隔（無効なら `None`）
    pub fn sweep_interval(&self) -> Option<std::time::Duration> {
        let seconds = self.window.sweep_interval_seconds.unwrap_or(self.window_seconds);
        (seconds > 0).then(|| std::time::Duration::from_secs(seconds))
    }

    /// Source key → metric field name
    pub fn metric_map(&self) -> HashMap<String, String> {
        self.sources
            .iter()
            .map(|(source, conf)| (source.clone(), conf.metric.clone()))
            .collect()
    }

    /// Field-level validation plus the cross-field checks `validator` cannot express
    pub fn validate_all(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;

        for (source, conf) in &self.sources {
            if source.trim().is_empty() {
                return Err(Error::InvalidConfiguration(
                    "source key must not be empty".to_string(),
                ));
            }
            if conf.metric.trim().is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "metric field for source '{}' must not be empty",
                    source
                )));
            }
        }

        if self.kafka.anomaly_topic == self.kafka.normal_topic {
            return Err(Error::InvalidConfiguration(format!(
                "anomaly and normal topics must differ (both '{}')",
                self.kafka.anomaly_topic
            )));
        }

        if let ScorerConfig::External {
            endpoint,
            timeout_seconds,
        } = &self.scorer
        {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::InvalidConfiguration(format!(
                    "external scorer endpoint must be an http(s) URL: {}",
                    endpoint
                )));
            }
            if *timeout_seconds == 0 {
                return Err(Error::InvalidConfiguration(
                    "external scorer timeout must be at least 1 second".to_string(),
                ));
            }
        }

        Ok(())
    }
}
