//! Anomaly Engine
//!
//! レコードごとのウィンドウ更新、フラッシュ判定、特徴量抽出、スコアリングを統括する。
//!
//! Per source key the lifecycle is `absent → open → flush-eligible → absent`.
//! Eligibility is tested and acted on inside [`WindowStore::flush_if_expired`],
//! so one flush event produces exactly one [`Decision`] no matter how many
//! callers race on the same key. Under tumbling windows a sample past the
//! open window's end also closes it, and that window is decided first.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DetectorConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::features;
use crate::metrics::DetectorMetrics;
use crate::record::{FirewallLog, MetricLookup};
use crate::scoring::{self, AnomalyScorer};
use crate::window::{UpsertOutcome, Window, WindowSettings, WindowStore};

/// レコードが破棄された理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No metric mapping for the record's log source
    UnmappedSource(String),
}

/// `ingest` の結果
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Record dropped and counted; nothing stored
    Dropped(DropReason),
    /// Sample stored; the window stays open
    Buffered(UpsertOutcome),
    /// Sample stored and the window flushed into a decision
    Flushed(Decision),
    /// Sample opened the next tumbling window; the window it closed became a
    /// decision, and the new window may itself have been flushed
    Rolled {
        closed: Decision,
        flushed: Option<Decision>,
    },
}

impl IngestOutcome {
    /// The first decision produced by this record, if any
    pub fn decision(self) -> Option<Decision> {
        self.into_decisions().into_iter().next()
    }

    /// Every decision produced by this record, oldest window first
    pub fn into_decisions(self) -> Vec<Decision> {
        match self {
            IngestOutcome::Dropped(_) | IngestOutcome::Buffered(_) => Vec::new(),
            IngestOutcome::Flushed(decision) => vec![decision],
            IngestOutcome::Rolled { closed, flushed } => {
                std::iter::once(closed).chain(flushed).collect()
            }
        }
    }
}

/// Summary of one raw batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Entries that decoded into records
    pub decoded: usize,
    /// Entries skipped because they failed to decode
    pub malformed: usize,
    /// Decoded records dropped for lack of a metric mapping
    pub dropped: usize,
    /// Decisions produced while processing the batch
    pub decisions: Vec<Decision>,
}

/// 異常検知エンジン
pub struct AnomalyEngine {
    store: WindowStore,
    scorer: Arc<dyn AnomalyScorer>,
    metrics: DetectorMetrics,
    /// source key → metric field
    sources: HashMap<String, String>,
    threshold: f64,
}

impl AnomalyEngine {
    /// 設定からエンジンを作成
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let scorer = scoring::build_scorer(&config.scorer)?;
        Self::with_scorer(config, scorer)
    }

    /// 任意のスコアラーでエンジンを作成
    pub fn with_scorer(config: &DetectorConfig, scorer: Arc<dyn AnomalyScorer>) -> Result<Self> {
        let metrics = DetectorMetrics::new()?;
        let store = WindowStore::new(
            WindowSettings::from_config(config),
            metrics.windows_created().clone(),
        );

        info!(
            model_path = %config.model_path,
            scorer = scorer.name(),
            window_seconds = config.window_seconds,
            threshold = config.score_threshold,
            sources = config.sources.len(),
            "anomaly engine initialized"
        );

        Ok(Self {
            store,
            scorer,
            metrics,
            sources: config.metric_map(),
            threshold: config.score_threshold,
        })
    }

    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn metrics(&self) -> &DetectorMetrics {
        &self.metrics
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// ソースに設定されたメトリクス名
    pub fn metric_field_for(&self, source: &str) -> Option<&str> {
        self.sources.get(source).map(String::as_str)
    }

    /// 現在時刻でレコードを処理
    pub async fn ingest(&self, record: &FirewallLog) -> IngestOutcome {
        self.ingest_at(record, Utc::now()).await
    }

    /// Process one record, evaluating flush eligibility against `now`.
    pub async fn ingest_at(&self, record: &FirewallLog, now: DateTime<Utc>) -> IngestOutcome {
        self.metrics.processed_logs().inc();

        let Some(metric_field) = self.metric_field_for(&record.log_source) else {
            self.metrics.records_dropped().inc();
            warn!(
                source = %record.log_source,
                "No configuration found for log source"
            );
            return IngestOutcome::Dropped(DropReason::UnmappedSource(record.log_source.clone()));
        };

        let metric_value = match record.metric_value(metric_field) {
            MetricLookup::Found(v) => v,
            MetricLookup::Unknown => {
                warn!(
                    source = %record.log_source,
                    metric = metric_field,
                    "Unknown metric field, using 0.0"
                );
                0.0
            }
        };

        let upsert = self.store.upsert(
            &record.log_source,
            metric_value,
            &record.source_ip,
            record.timestamp,
        );

        let (upsert, closed) = match upsert {
            UpsertOutcome::Rolled(previous) => {
                (UpsertOutcome::Created, Some(self.decide(previous).await))
            }
            other => (other, None),
        };

        let flushed = match self.store.flush_if_expired(&record.log_source, now) {
            Some(window) => Some(self.decide(window).await),
            None => None,
        };

        match (closed, flushed) {
            (Some(closed), flushed) => IngestOutcome::Rolled { closed, flushed },
            (None, Some(decision)) => IngestOutcome::Flushed(decision),
            (None, None) => IngestOutcome::Buffered(upsert),
        }
    }

    /// 生データのバッチを処理（現在時刻）
    pub async fn process_batch<B: AsRef<[u8]>>(&self, entries: &[B]) -> BatchReport {
        self.process_batch_at(entries, Utc::now()).await
    }

    /// Decode and ingest every entry; malformed entries are skipped and counted.
    pub async fn process_batch_at<B: AsRef<[u8]>>(
        &self,
        entries: &[B],
        now: DateTime<Utc>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for entry in entries {
            let record = match FirewallLog::from_slice(entry.as_ref()) {
                Ok(record) => record,
                Err(e) => {
                    self.metrics.malformed_records().inc();
                    report.malformed += 1;
                    warn!(error = %e, "Failed to parse log entry");
                    continue;
                }
            };
            report.decoded += 1;

            match self.ingest_at(&record, now).await {
                IngestOutcome::Dropped(_) => report.dropped += 1,
                outcome => report.decisions.extend(outcome.into_decisions()),
            }
        }

        debug!(
            decoded = report.decoded,
            malformed = report.malformed,
            dropped = report.dropped,
            decisions = report.decisions.len(),
            "batch processed"
        );

        report
    }

    /// Flush every window that is eligible at `now`, independent of new samples.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<Decision> {
        let windows = self.store.drain_expired(now);
        if !windows.is_empty() {
            debug!(count = windows.len(), "idle sweep flushing windows");
        }
        self.decide_all(windows).await
    }

    /// 全ウィンドウを強制フラッシュ
    pub async fn flush_all(&self) -> Vec<Decision> {
        let windows = self.store.drain_all();
        self.decide_all(windows).await
    }

    async fn decide_all(&self, windows: Vec<Window>) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(windows.len());
        for window in windows {
            decisions.push(self.decide(window).await);
        }
        decisions
    }

    /// Feature extraction → scoring → decision, with counters.
    async fn decide(&self, window: Window) -> Decision {
        let features = features::extract(&window);
        let score = self.scorer.score(&features).await;
        let is_anomaly = scoring::classify(score, self.threshold);
        let metric_field = self
            .metric_field_for(&window.source_key)
            .unwrap_or_default()
            .to_string();

        let decision = Decision::from_window(&window, features, score, is_anomaly, metric_field);

        self.metrics.decisions_emitted().inc();
        if is_anomaly {
            self.metrics.anomalies_detected().inc();
            warn!(
                source = %decision.log_source,
                score = decision.anomaly_score,
                samples = window.sample_count(),
                unique_ips = window.ip_count(),
                "anomaly detected"
            );
        } else {
            info!(
                source = %decision.log_source,
                score = decision.anomaly_score,
                samples = window.sample_count(),
                "window flushed"
            );
        }

        decision
    }
}
