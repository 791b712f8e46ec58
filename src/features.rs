//! Feature Extraction
//!
//! ウィンドウのスナップショットから7つの統計量を算出する純粋関数。

use serde::{Deserialize, Serialize};

use crate::window::Window;

/// 特徴量ベクトル
///
/// All seven fields are always present; an empty window yields all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// 平均値
    pub mean_value: f64,
    /// 標準偏差
    pub std_dev: f64,
    /// 最大値
    pub max_value: f64,
    /// 最小値
    pub min_value: f64,
    /// ベースラインからの変化率（%）
    pub percent_change: f64,
    /// ユニークIP数
    pub unique_ips: f64,
    /// ピーク/平均比
    pub peak_to_mean_ratio: f64,
}

impl FeatureVector {
    /// Feature names in a fixed order
    pub const NAMES: [&'static str; 7] = [
        "mean_value",
        "std_dev",
        "max_value",
        "min_value",
        "percent_change",
        "unique_ips",
        "peak_to_mean_ratio",
    ];

    /// 名前で特徴量を取得
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "mean_value" => Some(self.mean_value),
            "std_dev" => Some(self.std_dev),
            "max_value" => Some(self.max_value),
            "min_value" => Some(self.min_value),
            "percent_change" => Some(self.percent_change),
            "unique_ips" => Some(self.unique_ips),
            "peak_to_mean_ratio" => Some(self.peak_to_mean_ratio),
            _ => None,
        }
    }

    /// `NAMES` 順の値
    pub fn to_array(&self) -> [f64; 7] {
        [
            self.mean_value,
            self.std_dev,
            self.max_value,
            self.min_value,
            self.percent_change,
            self.unique_ips,
            self.peak_to_mean_ratio,
        ]
    }
}

/// ウィンドウから特徴量を抽出
pub fn extract(window: &Window) -> FeatureVector {
    let samples = &window.samples;
    if samples.is_empty() {
        return FeatureVector::default();
    }

    let unique_ips = window.ip_count() as f64;

    let mean_value = mean(samples);
    let std_dev = sample_std_dev(samples, mean_value);

    let (min_value, max_value) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let percent_change = if window.baseline_mean > 0.0 {
        (mean_value - window.baseline_mean) / window.baseline_mean * 100.0
    } else {
        0.0
    };

    let peak_to_mean_ratio = if mean_value > 0.0 {
        max_value / mean_value
    } else {
        0.0
    };

    FeatureVector {
        mean_value,
        std_dev,
        max_value,
        min_value,
        percent_change,
        unique_ips,
        peak_to_mean_ratio,
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator), 0 below two samples.
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
