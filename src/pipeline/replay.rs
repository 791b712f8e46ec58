//! Event-time replay
//!
//! 記録済みログを再生する。現在時刻の代わりに、これまでに見た最大のタイムスタンプ
//! (watermark) でフラッシュ判定を行うため、結果は実行時刻に依存しない。
//!
//! Each time the watermark advances, windows that are idle as of the new
//! watermark are swept before the record is ingested, which is what the live
//! sweeper would have done between the two records.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::source::RecordSource;
use crate::engine::{AnomalyEngine, BatchReport, IngestOutcome};
use crate::error::Result;
use crate::record::FirewallLog;

/// Replay every batch from `source`, then flush whatever is still open.
pub async fn replay<S>(engine: &AnomalyEngine, source: &mut S) -> Result<BatchReport>
where
    S: RecordSource + ?Sized,
{
    let mut report = BatchReport::default();
    let mut watermark: Option<DateTime<Utc>> = None;

    while let Some(batch) = source.next_batch().await? {
        for entry in &batch {
            let record = match FirewallLog::from_slice(entry) {
                Ok(record) => record,
                Err(e) => {
                    engine.metrics().malformed_records().inc();
                    report.malformed += 1;
                    warn!(error = %e, "Failed to parse log entry");
                    continue;
                }
            };
            report.decoded += 1;

            if watermark.map_or(true, |w| record.timestamp > w) {
                watermark = Some(record.timestamp);
                report
                    .decisions
                    .extend(engine.sweep_idle(record.timestamp).await);
            }
            let now = watermark.unwrap_or(record.timestamp);

            match engine.ingest_at(&record, now).await {
                IngestOutcome::Dropped(_) => report.dropped += 1,
                outcome => report.decisions.extend(outcome.into_decisions()),
            }
        }
    }

    report.decisions.extend(engine.flush_all().await);

    info!(
        source = source.name(),
        records = report.decoded,
        malformed = report.malformed,
        dropped = report.dropped,
        decisions = report.decisions.len(),
        "replay complete"
    );
    Ok(report)
}
