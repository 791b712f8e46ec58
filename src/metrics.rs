//! Detector Metrics
//!
//! Prometheusカウンターの収集とエクスポート

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::{Error, Result};

/// 検知器メトリクス
#[derive(Debug, Clone)]
pub struct DetectorMetrics {
    /// 処理済みレコード総数
    processed_logs: IntCounter,
    /// 検知された異常の総数
    anomalies_detected: IntCounter,
    /// 作成されたウィンドウの総数
    windows_created: IntCounter,
    /// 出力された判定の総数
    decisions_emitted: IntCounter,
    /// ソース未設定で破棄されたレコード数
    records_dropped: IntCounter,
    /// デコードに失敗したレコード数
    malformed_records: IntCounter,
    /// Prometheusレジストリ
    registry: Arc<Registry>,
}

impl DetectorMetrics {
    /// 新しいメトリクスインスタンスを作成
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let processed_logs = register(
            &registry,
            "processed_logs_total",
            "Total number of firewall log records handed to the engine",
        )?;
        let anomalies_detected = register(
            &registry,
            "anomalies_detected_total",
            "Total number of windows classified as anomalous",
        )?;
        let windows_created = register(
            &registry,
            "windows_created_total",
            "Total number of sliding windows opened",
        )?;
        let decisions_emitted = register(
            &registry,
            "decisions_emitted_total",
            "Total number of flushed windows turned into decisions",
        )?;
        let records_dropped = register(
            &registry,
            "records_dropped_total",
            "Records dropped because their log source has no metric mapping",
        )?;
        let malformed_records = register(
            &registry,
            "malformed_records_total",
            "Records that failed to decode",
        )?;

        Ok(Self {
            processed_logs,
            anomalies_detected,
            windows_created,
            decisions_emitted,
            records_dropped,
            malformed_records,
            registry,
        })
    }

    pub fn processed_logs(&self) -> &IntCounter {
        &self.processed_logs
    }

    pub fn anomalies_detected(&self) -> &IntCounter {
        &self.anomalies_detected
    }

    pub fn windows_created(&self) -> &IntCounter {
        &self.windows_created
    }

    pub fn decisions_emitted(&self) -> &IntCounter {
        &self.decisions_emitted
    }

    pub fn records_dropped(&self) -> &IntCounter {
        &self.records_dropped
    }

    pub fn malformed_records(&self) -> &IntCounter {
        &self.malformed_records
    }

    /// 現在値のスナップショット
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed_logs: self.processed_logs.get(),
            anomalies_detected: self.anomalies_detected.get(),
            windows_created: self.windows_created.get(),
            decisions_emitted: self.decisions_emitted.get(),
            records_dropped: self.records_dropped.get(),
            malformed_records: self.malformed_records.get(),
        }
    }

    /// Prometheusレジストリを取得
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheusテキスト形式でエクスポート
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

fn register(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed_logs: u64,
    pub anomalies_detected: u64,
    pub windows_created: u64,
    pub decisions_emitted: u64,
    pub records_dropped: u64,
    pub malformed_records: u64,
}
