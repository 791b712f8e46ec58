//! Detector Service
//!
//! ソースからバッチを取得し、エンジンで処理し、判定をシンクへ送るメインループ。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sink::DecisionSink;
use super::source::RecordSource;
use crate::config::DetectorConfig;
use crate::decision::Decision;
use crate::engine::AnomalyEngine;
use crate::error::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const PUBLISH_ATTEMPTS: usize = 3;

/// Counters for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    pub batches: usize,
    pub records: usize,
    pub malformed: usize,
    pub dropped: usize,
    pub decisions: usize,
    pub published: usize,
    /// Source fetch errors plus decisions that could not be published
    pub failures: usize,
}

#[derive(Debug, Default)]
struct PublishStats {
    published: usize,
    failed: usize,
}

/// 検知サービス
pub struct DetectorService {
    engine: Arc<AnomalyEngine>,
    sink: Arc<dyn DecisionSink>,
    poll_interval: Duration,
    sweep_interval: Option<Duration>,
    retry_backoff: Duration,
}

impl DetectorService {
    pub fn new(engine: Arc<AnomalyEngine>, sink: Arc<dyn DecisionSink>) -> Self {
        Self {
            engine,
            sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweep_interval: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Build from config. The sweeper runs once per window duration unless
    /// `window.sweep_interval_seconds` overrides it (0 turns it off).
    pub fn from_config(
        config: &DetectorConfig,
        engine: Arc<AnomalyEngine>,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        Self::new(engine, sink).with_sweep_interval(config.sweep_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn engine(&self) -> &Arc<AnomalyEngine> {
        &self.engine
    }

    /// Run until the source is exhausted or `cancel` fires, then flush every
    /// open window and publish the resulting decisions.
    ///
    /// Source and sink failures are logged and retried; any other error ends
    /// the run.
    pub async fn run(
        &self,
        mut source: Box<dyn RecordSource>,
        cancel: CancellationToken,
    ) -> Result<ServiceSummary> {
        let mut summary = ServiceSummary::default();
        let sweep_cancel = cancel.child_token();
        let sweeper = self.spawn_sweeper(sweep_cancel.clone());

        info!(
            source = source.name(),
            sink = self.sink.name(),
            scorer = self.engine.scorer_name(),
            sweep_interval = ?self.sweep_interval,
            "detector service started"
        );

        let outcome = self.poll_loop(source.as_mut(), &cancel, &mut summary).await;

        sweep_cancel.cancel();
        if let Some(handle) = sweeper {
            match handle.await {
                Ok(stats) => {
                    summary.decisions += stats.published + stats.failed;
                    summary.published += stats.published;
                    summary.failures += stats.failed;
                }
                Err(e) => warn!(error = %e, "sweeper task ended abnormally"),
            }
        }

        let remaining = self.engine.flush_all().await;
        summary.decisions += remaining.len();
        let stats = self.publish_all(&remaining).await;
        summary.published += stats.published;
        summary.failures += stats.failed;
        if let Err(e) = self.sink.flush().await {
            warn!(sink = self.sink.name(), error = %e, "sink flush failed");
        }

        outcome?;

        info!(
            batches = summary.batches,
            records = summary.records,
            decisions = summary.decisions,
            published = summary.published,
            failures = summary.failures,
            "detector service stopped"
        );
        Ok(summary)
    }

    async fn poll_loop(
        &self,
        source: &mut dyn RecordSource,
        cancel: &CancellationToken,
        summary: &mut ServiceSummary,
    ) -> Result<()> {
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                batch = source.next_batch() => batch,
            };

            match fetched {
                Ok(Some(batch)) if batch.is_empty() => {
                    if sleep_or_cancel(self.poll_interval, cancel).await {
                        return Ok(());
                    }
                }
                Ok(Some(batch)) => {
                    summary.batches += 1;
                    summary.records += batch.len();

                    let report = self.engine.process_batch(&batch).await;
                    summary.malformed += report.malformed;
                    summary.dropped += report.dropped;
                    summary.decisions += report.decisions.len();

                    let stats = self.publish_all(&report.decisions).await;
                    summary.published += stats.published;
                    summary.failures += stats.failed;
                }
                Ok(None) => {
                    info!(source = source.name(), "source exhausted");
                    return Ok(());
                }
                Err(e) if e.is_collaborator_failure() => {
                    summary.failures += 1;
                    error!(source = source.name(), error = %e, "failed to fetch batch");
                    if sleep_or_cancel(self.retry_backoff, cancel).await {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn publish_all(&self, decisions: &[Decision]) -> PublishStats {
        publish_decisions(self.sink.as_ref(), decisions, self.retry_backoff).await
    }

    fn spawn_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<PublishStats>> {
        let period = self.sweep_interval?;
        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        let backoff = self.retry_backoff;

        Some(tokio::spawn(async move {
            let mut stats = PublishStats::default();
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let decisions = engine.sweep_idle(Utc::now()).await;
                        if decisions.is_empty() {
                            continue;
                        }
                        debug!(count = decisions.len(), "sweeper flushed idle windows");
                        let round = publish_decisions(sink.as_ref(), &decisions, backoff).await;
                        stats.published += round.published;
                        stats.failed += round.failed;
                    }
                }
            }
            stats
        }))
    }
}

async fn publish_decisions(
    sink: &dyn DecisionSink,
    decisions: &[Decision],
    backoff: Duration,
) -> PublishStats {
    let mut stats = PublishStats::default();
    for decision in decisions {
        if publish_with_retry(sink, decision, backoff).await {
            stats.published += 1;
        } else {
            stats.failed += 1;
        }
    }
    stats
}

/// Publish one decision, retrying a bounded number of times.
async fn publish_with_retry(sink: &dyn DecisionSink, decision: &Decision, backoff: Duration) -> bool {
    for attempt in 1..=PUBLISH_ATTEMPTS {
        match sink.publish(decision).await {
            Ok(()) => return true,
            Err(e) if attempt < PUBLISH_ATTEMPTS => {
                warn!(
                    sink = sink.name(),
                    source = %decision.log_source,
                    attempt,
                    error = %e,
                    "publish failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                error!(
                    sink = sink.name(),
                    source = %decision.log_source,
                    error = %e,
                    "Failed to publish decision"
                );
            }
        }
    }
    false
}

/// Returns true when cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaConfig;
    use crate::error::Error;
    use crate::pipeline::sink::ChannelSink;
    use crate::pipeline::source::{MemorySource, RawBatch};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(source: &str, ip: &str, connections: u64, age_secs: i64) -> String {
        let ts = Utc::now() - chrono::Duration::seconds(age_secs);
        format!(
            r#"{{"timestamp":"{}","log_source":"{}","source_ip":"{}","connection_count":{}}}"#,
            ts.to_rfc3339(),
            source,
            ip,
            connections
        )
    }

    fn engine() -> Arc<AnomalyEngine> {
        Arc::new(AnomalyEngine::new(&DetectorConfig::default()).unwrap())
    }

    struct PendingSource;

    #[async_trait]
    impl RecordSource for PendingSource {
        fn name(&self) -> &str {
            "pending"
        }
        async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
            std::future::pending().await
        }
    }

    struct FlakySource {
        calls: usize,
    }

    #[async_trait]
    impl RecordSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
            self.calls += 1;
            match self.calls {
                1 => Err(Error::Source("connection reset".to_string())),
                2 => Ok(Some(vec![entry("fortinet.firewall", "1.1.1.1", 3, 0).into_bytes()])),
                _ => Ok(None),
            }
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl DecisionSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }
        async fn publish(&self, _decision: &Decision) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Sink("broker unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_until_exhausted_flushes_open_windows() {
        let (sink, mut rx) = ChannelSink::channel(KafkaConfig::default(), 16);
        let service = DetectorService::new(engine(), Arc::new(sink));

        let mut source = MemorySource::new();
        source.push_batch([
            entry("fortinet.firewall", "1.1.1.1", 10, 0),
            "garbage".to_string(),
            entry("cisco.asa", "1.1.1.1", 10, 0),
        ]);
        source.push_batch([entry("fortinet.firewall", "1.1.1.2", 20, 0)]);

        let summary = service
            .run(Box::new(source), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.records, 4);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.decisions, 1);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.failures, 0);

        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.topic, "firewall-normal");
        assert_eq!(routed.decision.features.mean_value, 15.0);
        assert!(service.engine().store().is_empty());
    }

    #[tokio::test]
    async fn test_stale_records_flush_while_running() {
        let (sink, mut rx) = ChannelSink::channel(KafkaConfig::default(), 16);
        let service = DetectorService::new(engine(), Arc::new(sink));

        // window end is 240s ago, so the window is eligible on its first sample
        let mut source = MemorySource::new();
        source.push_batch([entry("fortinet.firewall", "1.1.1.1", 10, 300)]);

        let summary = service
            .run(Box::new(source), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.decisions, 1);
        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.decision.metric_value, 10.0);
        assert_eq!(routed.decision.features.mean_value, 10.0);
        assert_eq!(routed.decision.features.std_dev, 0.0);
        assert!(service.engine().store().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_fetch_and_flushes() {
        let engine = engine();
        let (sink, mut rx) = ChannelSink::channel(KafkaConfig::default(), 16);
        let service = DetectorService::new(Arc::clone(&engine), Arc::new(sink));

        let record = crate::record::FirewallLog::from_json(&entry("fortinet.firewall", "1.1.1.1", 5, 0)).unwrap();
        engine.ingest(&record).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = service.run(Box::new(PendingSource), cancel).await.unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.published, 1);
        assert_eq!(rx.recv().await.unwrap().decision.log_source, "fortinet.firewall");
    }

    #[tokio::test]
    async fn test_source_failure_is_retried() {
        let (sink, _rx) = ChannelSink::channel(KafkaConfig::default(), 16);
        let service = DetectorService::new(engine(), Arc::new(sink))
            .with_retry_backoff(Duration::from_millis(1));

        let summary = service
            .run(Box::new(FlakySource { calls: 0 }), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.published, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_counted_not_fatal() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let service = DetectorService::new(engine(), sink.clone())
            .with_retry_backoff(Duration::from_millis(1));

        let mut source = MemorySource::new();
        source.push_batch([entry("fortinet.firewall", "1.1.1.1", 10, 0)]);

        let summary = service
            .run(Box::new(source), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.decisions, 1);
        assert_eq!(summary.published, 0);
        assert_eq!(summary.failures, 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), PUBLISH_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_sweeper_flushes_idle_windows() {
        let engine = engine();
        let (sink, mut rx) = ChannelSink::channel(KafkaConfig::default(), 16);
        let service = DetectorService::new(Arc::clone(&engine), Arc::new(sink))
            .with_sweep_interval(Some(Duration::from_millis(10)));

        // open the window as of its own timestamp so it is not flushed on ingest
        let record = crate::record::FirewallLog::from_json(&entry("fortinet.firewall", "1.1.1.1", 5, 300)).unwrap();
        engine.ingest_at(&record, record.timestamp).await;
        assert_eq!(engine.store().len(), 1);

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            async move { service.run(Box::new(PendingSource), cancel).await }
        };
        let handle = tokio::spawn(run);

        let routed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.decision.log_source, "fortinet.firewall");

        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.decisions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_config_flushes_quiet_source() {
        let config = DetectorConfig::default();
        let engine = Arc::new(AnomalyEngine::new(&config).unwrap());
        let (sink, mut rx) = ChannelSink::channel(config.kafka.clone(), 16);
        let service = DetectorService::from_config(&config, Arc::clone(&engine), Arc::new(sink));

        // the source went quiet after this record; no later sample will arrive
        let record = crate::record::FirewallLog::from_json(&entry("fortinet.firewall", "1.1.1.1", 5, 300)).unwrap();
        engine.ingest_at(&record, record.timestamp).await;
        assert_eq!(engine.store().len(), 1);

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            async move { service.run(Box::new(PendingSource), cancel).await }
        };
        let handle = tokio::spawn(run);

        // one window duration of virtual time is enough for the first sweep
        let routed = tokio::time::timeout(Duration::from_secs(2 * config.window_seconds), rx.recv())
            .await
            .expect("idle window swept without new samples")
            .unwrap();
        assert_eq!(routed.decision.log_source, "fortinet.firewall");
        assert!(engine.store().is_empty());

        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(summary.decisions, 1);
        assert_eq!(summary.published, 1);
    }
}
