//! # firewall-anomaly-detector
//!
//! Streaming anomaly detection for firewall logs.
//!
//! Records are grouped per log source into time windows. When a window has been
//! quiet for one window duration past its end it is flushed: seven statistical
//! features are extracted, scored against a threshold, and turned into a
//! [`Decision`] routed to either the anomaly or the normal topic.
//!
//! ```no_run
//! use firewall_anomaly_detector::{AnomalyEngine, DetectorConfig, FirewallLog};
//!
//! # async fn demo() -> firewall_anomaly_detector::Result<()> {
//! let engine = AnomalyEngine::new(&DetectorConfig::default())?;
//! let record = FirewallLog::from_json(
//!     r#"{"timestamp":"2024-01-15T10:30:00Z","log_source":"fortinet.firewall","source_ip":"192.168.1.10","connection_count":42}"#,
//! )?;
//! if let Some(decision) = engine.ingest(&record).await.decision() {
//!     println!("{}", serde_json::to_string(&decision)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod features;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod scoring;
pub mod window;

pub use config::{ConfigLoader, DetectorConfig};
pub use decision::{Decision, RoutingTarget};
pub use engine::{AnomalyEngine, BatchReport, IngestOutcome};
pub use error::{Error, Result};
pub use features::FeatureVector;
pub use metrics::{DetectorMetrics, MetricsSnapshot};
pub use record::FirewallLog;
pub use scoring::{AnomalyScorer, HeuristicScorer};
pub use window::{Window, WindowStore};
