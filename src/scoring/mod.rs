//! Anomaly Scoring
//!
//! 特徴量ベクトルを [0, 1] の異常スコアに変換する差し替え可能なポリシー。
//!
//! The engine only sees [`AnomalyScorer`]; which variant is active is decided
//! by [`build_scorer`] from configuration.

mod external;
mod heuristic;

pub use external::ExternalModelScorer;
pub use heuristic::HeuristicScorer;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ScorerConfig;
use crate::error::Result;
use crate::features::FeatureVector;

/// 異常スコアラー
#[async_trait]
pub trait AnomalyScorer: Send + Sync {
    /// スコアラー名
    fn name(&self) -> &str;

    /// Score in `[0, 1]`. Implementations never fail; adapters degrade internally.
    async fn score(&self, features: &FeatureVector) -> f64;
}

/// しきい値判定
pub fn classify(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// 設定からスコアラーを構築
pub fn build_scorer(config: &ScorerConfig) -> Result<Arc<dyn AnomalyScorer>> {
    match config {
        ScorerConfig::Heuristic => Ok(Arc::new(HeuristicScorer::new())),
        ScorerConfig::External {
            endpoint,
            timeout_seconds,
        } => Ok(Arc::new(ExternalModelScorer::new(
            endpoint.clone(),
            std::time::Duration::from_secs(*timeout_seconds),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_at_threshold() {
        assert!(classify(0.7, 0.7));
        assert!(!classify(0.69, 0.7));
        assert!(classify(1.0, 0.0));
    }

    #[tokio::test]
    async fn test_build_heuristic() {
        let scorer = build_scorer(&ScorerConfig::Heuristic).unwrap();
        assert_eq!(scorer.name(), "heuristic");
        assert_eq!(scorer.score(&FeatureVector::default()).await, 0.0);
    }

    #[test]
    fn test_build_external() {
        let scorer = build_scorer(&ScorerConfig::External {
            endpoint: "http://127.0.0.1:9/score".to_string(),
            timeout_seconds: 1,
        })
        .unwrap();
        assert_eq!(scorer.name(), "external");
    }
}
