//! Configuration
//!
//! 検知器の設定とローダー

pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, ENV_PREFIX};
pub use types::{
    BaselinePolicy, DetectorConfig, KafkaConfig, LogFormat, LogRotation, LoggingConfig,
    RedisConfig, ScorerConfig, SourceConfig, WindowBoundary, WindowConfig,
};
