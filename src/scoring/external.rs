//! External Model Scorer
//!
//! 外部の分類器エンドポイントに特徴量を送ってスコアを得るアダプター。
//!
//! Request body: `{"features": {...7 named values...}}`.
//! Expected response: `{"score": <number>}`. Any transport or decoding failure
//! falls back to the heuristic policy so a flushed window always gets a score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use super::{AnomalyScorer, HeuristicScorer};
use crate::error::{Error, Result};
use crate::features::FeatureVector;

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    features: &'a FeatureVector,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// 外部モデルスコアラー
pub struct ExternalModelScorer {
    endpoint: String,
    client: reqwest::Client,
}

impl ExternalModelScorer {
    /// 新しい外部モデルスコアラーを作成
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call the endpoint without fallback.
    pub async fn try_score(&self, features: &FeatureVector) -> Result<f64> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ScoreRequest { features })
            .send()
            .await?
            .error_for_status()?;

        let body: ScoreResponse = response.json().await?;
        if !body.score.is_finite() {
            return Err(Error::Scorer(format!(
                "non-finite score from {}",
                self.endpoint
            )));
        }
        Ok(body.score.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl AnomalyScorer for ExternalModelScorer {
    fn name(&self) -> &str {
        "external"
    }

    async fn score(&self, features: &FeatureVector) -> f64 {
        match self.try_score(features).await {
            Ok(score) => score,
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "external scorer failed, using heuristic"
                );
                HeuristicScorer::score_features(features)
            }
        }
    }
}
