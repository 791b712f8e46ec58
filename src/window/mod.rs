//! Sliding Windows
//!
//! ソースキーごとの時間ウィンドウと、その排他的なストア

mod store;

pub use store::{UpsertOutcome, WindowSettings, WindowStore};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::features;

/// ソースキー1つ分の集計ウィンドウ
///
/// Samples and IPs only grow until the window is flushed; `end >= start` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// ソースキー
    pub source_key: String,
    /// サンプル値（到着順）
    pub samples: Vec<f64>,
    /// 観測された送信元IP
    pub unique_ips: HashSet<String>,
    /// 前ウィンドウから引き継いだ平均値
    pub baseline_mean: f64,
    /// 開始時刻
    pub start: DateTime<Utc>,
    /// 終了時刻
    pub end: DateTime<Utc>,
}

impl Window {
    /// 空のウィンドウを作成
    pub fn new(
        source_key: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
        baseline_mean: f64,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            samples: Vec::new(),
            unique_ips: HashSet::new(),
            baseline_mean,
            start,
            end: start + duration,
        }
    }

    /// サンプルとIPを追加
    ///
    /// The IP is only allocated when it has not been seen in this window.
    pub fn push(&mut self, value: f64, origin_ip: &str) {
        self.samples.push(value);
        if !self.unique_ips.contains(origin_ip) {
            self.unique_ips.insert(origin_ip.to_string());
        }
    }

    /// サンプル数（重複値も数える）
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// 異なる送信元IPの数
    pub fn ip_count(&self) -> usize {
        self.unique_ips.len()
    }

    /// 最後に追加されたサンプル
    pub fn last_value(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    /// Arithmetic mean of the samples, 0.0 for an empty window.
    /// This is the value a flushed window leaves behind as the next baseline.
    pub fn mean(&self) -> f64 {
        features::mean(&self.samples)
    }

    /// Flush-eligible once at least one window duration has elapsed past `end`.
    pub fn is_flush_eligible(&self, now: DateTime<Utc>, duration: Duration) -> bool {
        now - self.end >= duration
    }
}
