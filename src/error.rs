//! Error types for the firewall anomaly detector.

use thiserror::Error;

/// Result type alias for detector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for detector operations
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A record failed to decode at the ingestion boundary
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Scorer failure (external classifier)
    #[error("Scorer error: {0}")]
    Scorer(String),

    /// Record source unavailable
    #[error("Record source error: {0}")]
    Source(String),

    /// Decision sink unavailable
    #[error("Decision sink error: {0}")]
    Sink(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Redis error
    #[cfg(feature = "redis-backend")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl Error {
    /// 外部コラボレータ（ソース・シンク）の障害かどうか
    ///
    /// The service loop retries batches that fail this way; every other
    /// variant is a data or configuration problem.
    pub fn is_collaborator_failure(&self) -> bool {
        match self {
            Error::Source(_) | Error::Sink(_) | Error::Network(_) | Error::Io(_) => true,
            #[cfg(feature = "redis-backend")]
            Error::Redis(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedRecord("missing field `log_source`".to_string());
        assert!(err.to_string().contains("log_source"));
    }

    #[test]
    fn test_collaborator_failure_classification() {
        assert!(Error::Source("connection refused".into()).is_collaborator_failure());
        assert!(Error::Sink("broker down".into()).is_collaborator_failure());
        assert!(!Error::MalformedRecord("bad".into()).is_collaborator_failure());
        assert!(!Error::Config("missing".into()).is_collaborator_failure());
    }
}
