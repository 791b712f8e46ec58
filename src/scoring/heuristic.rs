//! Heuristic Scorer
//!
//! 加算型のしきい値ヒューリスティック（学習済みモデルの代替）

use async_trait::async_trait;

use super::AnomalyScorer;
use crate::features::FeatureVector;

const PERCENT_CHANGE_LIMIT: f64 = 50.0;
const PEAK_TO_MEAN_LIMIT: f64 = 3.0;
const UNIQUE_IPS_LIMIT: f64 = 100.0;

/// ヒューリスティックスコアラー
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    /// 同期版スコア計算
    pub fn score_features(features: &FeatureVector) -> f64 {
        let mut score: f64 = 0.0;

        if features.percent_change.abs() > PERCENT_CHANGE_LIMIT {
            score += 0.3;
        }
        if features.peak_to_mean_ratio > PEAK_TO_MEAN_LIMIT {
            score += 0.2;
        }
        if features.std_dev > features.mean_value {
            score += 0.2;
        }
        if features.unique_ips > UNIQUE_IPS_LIMIT {
            score += 0.3;
        }

        score.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl AnomalyScorer for HeuristicScorer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn score(&self, features: &FeatureVector) -> f64 {
        Self::score_features(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal() -> FeatureVector {
        FeatureVector {
            percent_change: 10.0,
            peak_to_mean_ratio: 1.5,
            std_dev: 5.0,
            mean_value: 10.0,
            unique_ips: 50.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_anomaly_scoring() {
        let score = HeuristicScorer::score_features(&normal());
        assert!(score < 0.7, "normal features should score below threshold");

        let anomalous = FeatureVector {
            percent_change: 75.0,
            peak_to_mean_ratio: 4.0,
            std_dev: 15.0,
            mean_value: 10.0,
            unique_ips: 150.0,
            ..Default::default()
        };
        let score = HeuristicScorer::score_features(&anomalous);
        assert!(score >= 0.7, "anomalous features should score above threshold");
        assert!(score <= 1.0);
    }

    #[test]
    fn test_each_trigger_is_monotonic() {
        let base = normal();
        let base_score = HeuristicScorer::score_features(&base);

        let triggers = [
            FeatureVector { percent_change: 51.0, ..base },
            FeatureVector { percent_change: -80.0, ..base },
            FeatureVector { peak_to_mean_ratio: 3.5, ..base },
            FeatureVector { std_dev: 11.0, ..base },
            FeatureVector { unique_ips: 101.0, ..base },
        ];
        for features in triggers {
            assert!(HeuristicScorer::score_features(&features) > base_score);
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        let at_limits = FeatureVector {
            percent_change: 50.0,
            peak_to_mean_ratio: 3.0,
            std_dev: 10.0,
            mean_value: 10.0,
            unique_ips: 100.0,
            ..Default::default()
        };
        assert_eq!(HeuristicScorer::score_features(&at_limits), 0.0);
    }

    #[test]
    fn test_all_triggers_clamped() {
        let all = FeatureVector {
            percent_change: 1e9,
            peak_to_mean_ratio: 1e9,
            std_dev: 1e9,
            mean_value: 1.0,
            unique_ips: 1e9,
            ..Default::default()
        };
        let score = HeuristicScorer::score_features(&all);
        assert!((score - 1.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&score));
    }

    #[tokio::test]
    async fn test_trait_object_matches_sync() {
        let scorer: &dyn AnomalyScorer = &HeuristicScorer::new();
        let features = FeatureVector {
            unique_ips: 150.0,
            ..normal()
        };
        assert_eq!(
            scorer.score(&features).await,
            HeuristicScorer::score_features(&features)
        );
    }
}
