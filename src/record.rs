//! Firewall Log Record
//!
//! 入力レコードの型定義とデコード

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// ファイアウォールログ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallLog {
    /// イベント時刻
    pub timestamp: DateTime<Utc>,
    /// ログソース（ウィンドウのキー）
    #[serde(alias = "source_key")]
    pub log_source: String,
    /// 送信元IP
    #[serde(alias = "origin_ip")]
    pub source_ip: String,
    /// 宛先IP
    #[serde(default)]
    pub dest_ip: String,
    /// 接続数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_count: Option<u64>,
    /// 送信バイト数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
    /// 受信バイト数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_recv: Option<u64>,
    /// アクション（accept / deny / drop）
    #[serde(default)]
    pub action: String,
    /// 重要度
    #[serde(default)]
    pub severity: String,
    /// 補助データ
    #[serde(default)]
    pub raw: HashMap<String, serde_json::Value>,
}

/// Built-in numeric metric fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricField {
    ConnectionCount,
    BytesSent,
    BytesRecv,
}

impl MetricField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::ConnectionCount => "connection_count",
            MetricField::BytesSent => "bytes_sent",
            MetricField::BytesRecv => "bytes_recv",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connection_count" => Ok(MetricField::ConnectionCount),
            "bytes_sent" => Ok(MetricField::BytesSent),
            "bytes_recv" => Ok(MetricField::BytesRecv),
            other => Err(Error::Config(format!("unknown metric field: {}", other))),
        }
    }
}

/// Result of resolving a configured metric name against a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricLookup {
    /// Built-in field or numeric `raw` entry
    Found(f64),
    /// Name is neither a built-in field nor a numeric `raw` entry
    Unknown,
}

impl MetricLookup {
    /// 未知のフィールドは 0.0
    pub fn value(self) -> f64 {
        match self {
            MetricLookup::Found(v) => v,
            MetricLookup::Unknown => 0.0,
        }
    }
}

impl FirewallLog {
    /// JSONバイト列からデコード
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let log: FirewallLog =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedRecord(e.to_string()))?;
        log.check_required()?;
        Ok(log)
    }

    /// JSON文字列からデコード
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_slice(s.as_bytes())
    }

    fn check_required(&self) -> Result<()> {
        if self.log_source.is_empty() {
            return Err(Error::MalformedRecord("empty log_source".to_string()));
        }
        if self.source_ip.is_empty() {
            return Err(Error::MalformedRecord("empty source_ip".to_string()));
        }
        Ok(())
    }

    /// 組み込みフィールドの値（未設定なら 0）
    pub fn field_value(&self, field: MetricField) -> f64 {
        let value = match field {
            MetricField::ConnectionCount => self.connection_count,
            MetricField::BytesSent => self.bytes_sent,
            MetricField::BytesRecv => self.bytes_recv,
        };
        value.unwrap_or(0) as f64
    }

    /// Resolve a configured metric name: built-in fields first, then numeric `raw` entries.
    pub fn metric_value(&self, name: &str) -> MetricLookup {
        if let Ok(field) = name.parse::<MetricField>() {
            return MetricLookup::Found(self.field_value(field));
        }
        match self.raw.get(name).and_then(|v| v.as_f64()) {
            Some(v) => MetricLookup::Found(v),
            None => MetricLookup::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "timestamp": "2024-01-15T10:30:00Z",
        "log_source": "fortinet.firewall",
        "source_ip": "192.168.1.100",
        "dest_ip": "10.0.0.50",
        "connection_count": 150,
        "action": "accept",
        "severity": "medium",
        "raw": {
            "session_id": "12345",
            "protocol": "tcp",
            "dst_port": 443
        }
    }"#;

    #[test]
    fn test_parse_firewall_log() {
        let log = FirewallLog::from_json(SAMPLE).unwrap();
        assert_eq!(log.log_source, "fortinet.firewall");
        assert_eq!(log.source_ip, "192.168.1.100");
        assert_eq!(log.dest_ip, "10.0.0.50");
        assert_eq!(log.connection_count, Some(150));
        assert_eq!(log.bytes_sent, None);
        assert_eq!(log.action, "accept");
        assert_eq!(log.severity, "medium");
        assert_eq!(log.raw["protocol"], "tcp");
    }

    #[test]
    fn test_aliases_accepted() {
        let json = r#"{"timestamp":"2024-01-15T10:30:00Z","source_key":"cisco.asa","origin_ip":"1.2.3.4"}"#;
        let log = FirewallLog::from_json(json).unwrap();
        assert_eq!(log.log_source, "cisco.asa");
        assert_eq!(log.source_ip, "1.2.3.4");
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let json = r#"{"timestamp":"2024-01-15T10:30:00Z","source_ip":"1.2.3.4"}"#;
        assert!(matches!(
            FirewallLog::from_json(json),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            FirewallLog::from_json("not json"),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_empty_source_is_malformed() {
        let json = r#"{"timestamp":"2024-01-15T10:30:00Z","log_source":"","source_ip":"1.2.3.4"}"#;
        assert!(FirewallLog::from_json(json).is_err());
    }

    #[test]
    fn test_metric_extraction() {
        let mut log = FirewallLog::from_json(SAMPLE).unwrap();
        log.bytes_sent = Some(1024);
        log.bytes_recv = Some(2048);

        assert_eq!(log.metric_value("connection_count"), MetricLookup::Found(150.0));
        assert_eq!(log.metric_value("bytes_sent"), MetricLookup::Found(1024.0));
        assert_eq!(log.metric_value("bytes_recv"), MetricLookup::Found(2048.0));
        assert_eq!(log.metric_value("dst_port"), MetricLookup::Found(443.0));
        assert_eq!(log.metric_value("unknown_field"), MetricLookup::Unknown);
        assert_eq!(log.metric_value("unknown_field").value(), 0.0);
        // non-numeric raw entries are not metrics
        assert_eq!(log.metric_value("protocol"), MetricLookup::Unknown);
    }

    #[test]
    fn test_absent_builtin_metric_is_zero() {
        let log = FirewallLog::from_json(SAMPLE).unwrap();
        assert_eq!(log.metric_value("bytes_recv"), MetricLookup::Found(0.0));
    }
}
