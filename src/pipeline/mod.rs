//! Pipeline
//!
//! レコードソース → エンジン → 判定シンク

pub mod replay;
pub mod service;
pub mod sink;
pub mod source;

pub use replay::replay;
pub use service::{DetectorService, ServiceSummary};
pub use sink::{ChannelSink, DecisionSink, JsonLinesSink, RoutedDecision, TracingSink};
#[cfg(feature = "redis-backend")]
pub use source::RedisListSource;
pub use source::{LinesSource, MemorySource, RawBatch, RecordSource};
