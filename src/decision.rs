//! Decisions
//!
//! フラッシュされたウィンドウ1つにつき1件生成される判定結果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::KafkaConfig;
use crate::features::FeatureVector;
use crate::window::Window;

/// Reason tag for the windowed scoring path
pub const REASON_HIKE_RATE: &str = "hike_rate_detected";

/// 出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTarget {
    Anomaly,
    Normal,
}

impl RoutingTarget {
    pub fn for_anomaly(is_anomaly: bool) -> Self {
        if is_anomaly {
            RoutingTarget::Anomaly
        } else {
            RoutingTarget::Normal
        }
    }

    /// トピック名を解決
    pub fn topic<'a>(&self, kafka: &'a KafkaConfig) -> &'a str {
        match self {
            RoutingTarget::Anomaly => &kafka.anomaly_topic,
            RoutingTarget::Normal => &kafka.normal_topic,
        }
    }
}

/// 判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// ウィンドウ終了時刻
    pub timestamp: DateTime<Utc>,
    pub log_source: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub reason: String,
    pub features: FeatureVector,
    pub metric_field: String,
    /// 最後にサンプリングされた値
    pub metric_value: f64,
}

impl Decision {
    /// Build the decision for a flushed window.
    pub fn from_window(
        window: &Window,
        features: FeatureVector,
        anomaly_score: f64,
        is_anomaly: bool,
        metric_field: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: window.end,
            log_source: window.source_key.clone(),
            window_start: window.start,
            window_end: window.end,
            anomaly_score,
            is_anomaly,
            reason: REASON_HIKE_RATE.to_string(),
            features,
            metric_field: metric_field.into(),
            metric_value: window.last_value().unwrap_or(0.0),
        }
    }

    pub fn routing_target(&self) -> RoutingTarget {
        RoutingTarget::for_anomaly(self.is_anomaly)
    }

    pub fn topic<'a>(&self, kafka: &'a KafkaConfig) -> &'a str {
        self.routing_target().topic(kafka)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn window() -> Window {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let mut window = Window::new("fortinet.firewall", start, Duration::seconds(60), 0.0);
        window.push(10.0, "1.1.1.1");
        window.push(25.0, "1.1.1.2");
        window
    }

    #[test]
    fn test_decision_fields() {
        let w = window();
        let decision = Decision::from_window(&w, FeatureVector::default(), 0.8, true, "connection_count");

        assert_eq!(decision.timestamp, w.end);
        assert_eq!(decision.log_source, "fortinet.firewall");
        assert_eq!(decision.window_start, w.start);
        assert_eq!(decision.reason, REASON_HIKE_RATE);
        assert_eq!(decision.metric_value, 25.0);
        assert_eq!(decision.routing_target(), RoutingTarget::Anomaly);

        let kafka = KafkaConfig::default();
        assert_eq!(decision.topic(&kafka), "firewall-anomalies");
    }

    #[test]
    fn test_wire_format() {
        let decision =
            Decision::from_window(&window(), FeatureVector::default(), 0.2, false, "bytes_sent");
        let json = serde_json::to_value(&decision).unwrap();
        let object = json.as_object().unwrap();

        for key in [
            "timestamp",
            "log_source",
            "window_start",
            "window_end",
            "anomaly_score",
            "is_anomaly",
            "reason",
            "features",
            "metric_field",
            "metric_value",
        ] {
            assert!(object.contains_key(key), "missing {}", key);
        }
        assert_eq!(object.len(), 10);
        assert_eq!(object["features"].as_object().unwrap().len(), 7);

        let parsed: Decision = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.routing_target(), RoutingTarget::Normal);
        assert_eq!(parsed.topic(&KafkaConfig::default()), "firewall-normal");
    }
}
