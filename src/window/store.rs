//! Window Store
//!
//! ウィンドウの作成・追加・読み出し・フラッシュを排他的に管理する。
//!
//! The map is split into `shards` partitions, each behind its own
//! `parking_lot::RwLock`, selected by a hash of the source key. With one shard
//! this is a single lock over the whole map. All operations on a given key go
//! through the same shard, so per-key linearizability holds for any shard count.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use prometheus::IntCounter;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tracing::debug;

use super::Window;
use crate::config::{BaselinePolicy, DetectorConfig, WindowBoundary};

/// ストアの動作設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSettings {
    pub duration: Duration,
    pub boundary: WindowBoundary,
    pub baseline: BaselinePolicy,
    pub shards: usize,
}

impl WindowSettings {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            duration: config.window_duration(),
            boundary: config.window.boundary,
            baseline: config.window.baseline,
            shards: config.window.shards,
        }
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// Result of an `upsert`
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A new window was opened for the key
    Created,
    /// The sample went into the already open window
    Appended,
    /// The sample fell past the end of a tumbling window: the old window was
    /// closed and is handed back, and the sample opened the next grid window
    Rolled(Window),
}

impl UpsertOutcome {
    /// 閉じられたウィンドウ（ロールオーバー時のみ）
    pub fn into_closed(self) -> Option<Window> {
        match self {
            UpsertOutcome::Rolled(window) => Some(window),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Shard {
    windows: HashMap<String, Window>,
    /// Mean of the last flushed window per key, kept across flushes
    baselines: HashMap<String, f64>,
}

impl Shard {
    fn remove(&mut self, key: &str, policy: BaselinePolicy) -> Option<Window> {
        let window = self.windows.remove(key)?;
        if policy == BaselinePolicy::PreviousWindow && window.sample_count() > 0 {
            self.baselines.insert(key.to_string(), window.mean());
        }
        Some(window)
    }
}

/// ウィンドウストア
pub struct WindowStore {
    shards: Vec<RwLock<Shard>>,
    settings: WindowSettings,
    windows_created: IntCounter,
}

impl WindowStore {
    /// 新しいストアを作成
    pub fn new(settings: WindowSettings, windows_created: IntCounter) -> Self {
        let shard_count = settings.shards.max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(Shard::default()))
            .collect();

        Self {
            shards,
            settings,
            windows_created,
        }
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    fn shard(&self, key: &str) -> &RwLock<Shard> {
        if self.shards.len() == 1 {
            return &self.shards[0];
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn window_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        match self.settings.boundary {
            WindowBoundary::GapExtension => timestamp,
            WindowBoundary::Tumbling => align_to_grid(timestamp, self.settings.duration),
        }
    }

    /// サンプルを追加（ウィンドウがなければ作成）
    ///
    /// Under [`WindowBoundary::Tumbling`] a sample at or past the open window's
    /// end closes that window inside the same lock and lands in the grid cell
    /// that contains it. The closed window comes back in
    /// [`UpsertOutcome::Rolled`] and is no longer in the store.
    pub fn upsert(
        &self,
        key: &str,
        value: f64,
        origin_ip: &str,
        timestamp: DateTime<Utc>,
    ) -> UpsertOutcome {
        let duration = self.settings.duration;
        let mut shard = self.shard(key).write();

        let closed = match self.settings.boundary {
            WindowBoundary::Tumbling
                if shard.windows.get(key).is_some_and(|w| timestamp >= w.end) =>
            {
                shard.remove(key, self.settings.baseline)
            }
            _ => None,
        };

        let Shard {
            windows, baselines, ..
        } = &mut *shard;

        let mut outcome = UpsertOutcome::Appended;
        let window = windows.entry(key.to_string()).or_insert_with(|| {
            outcome = UpsertOutcome::Created;
            let baseline = match self.settings.baseline {
                BaselinePolicy::Zero => 0.0,
                BaselinePolicy::PreviousWindow => baselines.get(key).copied().unwrap_or(0.0),
            };
            Window::new(key, self.window_start(timestamp), duration, baseline)
        });

        window.push(value, origin_ip);

        if self.settings.boundary == WindowBoundary::GapExtension && timestamp > window.end {
            window.end = timestamp + duration;
        }

        if outcome == UpsertOutcome::Created {
            self.windows_created.inc();
            debug!(
                source = key,
                start = %window.start,
                end = %window.end,
                baseline = window.baseline_mean,
                "window created"
            );
        }

        match closed {
            Some(previous) => {
                debug!(
                    source = key,
                    closed_start = %previous.start,
                    next_start = %window.start,
                    "tumbling window rolled over"
                );
                UpsertOutcome::Rolled(previous)
            }
            None => outcome,
        }
    }

    /// 読み取り専用のスナップショット
    pub fn snapshot(&self, key: &str) -> Option<Window> {
        self.shard(key).read().windows.get(key).cloned()
    }

    /// ウィンドウを取り除いて返す（存在すれば）
    ///
    /// Removal and the returned value are one atomic step: concurrent callers
    /// for the same key get the window at most once.
    pub fn flush_and_clear(&self, key: &str) -> Option<Window> {
        self.shard(key).write().remove(key, self.settings.baseline)
    }

    /// Remove the window only if it is flush-eligible at `now`.
    ///
    /// The check and the removal happen under the same exclusive lock, so a
    /// window re-created by another caller after a flush is never taken early.
    pub fn flush_if_expired(&self, key: &str, now: DateTime<Utc>) -> Option<Window> {
        let mut shard = self.shard(key).write();
        let eligible = shard
            .windows
            .get(key)
            .is_some_and(|w| w.is_flush_eligible(now, self.settings.duration));
        if !eligible {
            return None;
        }
        shard.remove(key, self.settings.baseline)
    }

    /// 期限切れウィンドウをすべて取り出す
    pub fn drain_expired(&self, now: DateTime<Utc>) -> Vec<Window> {
        let duration = self.settings.duration;
        let mut drained = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write();
            let expired: Vec<String> = shard
                .windows
                .iter()
                .filter(|(_, w)| w.is_flush_eligible(now, duration))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                if let Some(window) = shard.remove(&key, self.settings.baseline) {
                    drained.push(window);
                }
            }
        }
        drained.sort_by(|a, b| a.start.cmp(&b.start).then(a.source_key.cmp(&b.source_key)));
        drained
    }

    /// 全ウィンドウを取り出す（シャットダウン・リプレイ終了時）
    pub fn drain_all(&self) -> Vec<Window> {
        let mut drained = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write();
            let keys: Vec<String> = shard.windows.keys().cloned().collect();
            for key in keys {
                if let Some(window) = shard.remove(&key, self.settings.baseline) {
                    drained.push(window);
                }
            }
        }
        drained.sort_by(|a, b| a.start.cmp(&b.start).then(a.source_key.cmp(&b.source_key)));
        drained
    }

    /// 次のウィンドウに引き継がれるベースライン
    pub fn baseline(&self, key: &str) -> Option<f64> {
        self.shard(key).read().baselines.get(key).copied()
    }

    /// 開いているウィンドウ数
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().windows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 開いているウィンドウのキー一覧
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .shards
            .iter()
            .flat_map(|s| s.read().windows.keys().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys
    }
}

/// Floor `timestamp` to a multiple of `duration` since the Unix epoch.
fn align_to_grid(timestamp: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    let step = duration.num_seconds().max(1);
    let secs = timestamp.timestamp().div_euclid(step) * step;
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(timestamp)
}
