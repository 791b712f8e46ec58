//! Decision Sinks
//!
//! 判定結果をトピックへ送る外部コラボレータ

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::config::KafkaConfig;
use crate::decision::Decision;
use crate::error::{Error, Result};

/// 判定シンク
#[async_trait]
pub trait DecisionSink: Send + Sync {
    fn name(&self) -> &str;

    /// Publish one decision to its routed topic.
    async fn publish(&self, decision: &Decision) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A decision paired with the topic it was routed to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedDecision {
    pub topic: String,
    pub decision: Decision,
}

impl RoutedDecision {
    pub fn new(decision: &Decision, kafka: &KafkaConfig) -> Self {
        Self {
            topic: decision.topic(kafka).to_string(),
            decision: decision.clone(),
        }
    }
}

/// One JSON object per line: `{"topic": ..., "decision": {...}}`
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
    kafka: KafkaConfig,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W, kafka: KafkaConfig) -> Self {
        Self {
            writer: Mutex::new(writer),
            kafka,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<tokio::io::Stdout> {
    /// 標準出力へ書き込む
    pub fn stdout(kafka: KafkaConfig) -> Self {
        Self::new(tokio::io::stdout(), kafka)
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DecisionSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn publish(&self, decision: &Decision) -> Result<()> {
        let mut line = serde_json::to_vec(&RoutedDecision::new(decision, &self.kafka))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| Error::Sink(format!("write failed: {}", e)))
    }

    async fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| Error::Sink(format!("flush failed: {}", e)))
    }
}

/// In-process channel sink
pub struct ChannelSink {
    sender: mpsc::Sender<RoutedDecision>,
    kafka: KafkaConfig,
}

impl ChannelSink {
    /// チャネルを作成
    pub fn channel(kafka: KafkaConfig, capacity: usize) -> (Self, mpsc::Receiver<RoutedDecision>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, kafka }, receiver)
    }
}

#[async_trait]
impl DecisionSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn publish(&self, decision: &Decision) -> Result<()> {
        self.sender
            .send(RoutedDecision::new(decision, &self.kafka))
            .await
            .map_err(|_| Error::Sink("decision channel closed".to_string()))
    }
}

/// Logs decisions only
pub struct TracingSink {
    kafka: KafkaConfig,
}

impl TracingSink {
    pub fn new(kafka: KafkaConfig) -> Self {
        Self { kafka }
    }
}

#[async_trait]
impl DecisionSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn publish(&self, decision: &Decision) -> Result<()> {
        info!(
            topic = decision.topic(&self.kafka),
            source = %decision.log_source,
            score = decision.anomaly_score,
            is_anomaly = decision.is_anomaly,
            "decision"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use crate::window::Window;
    use chrono::{Duration, Utc};
    use tokio_test::{assert_err, assert_ok};

    fn decision(is_anomaly: bool) -> Decision {
        let mut window = Window::new("fortinet.firewall", Utc::now(), Duration::seconds(60), 0.0);
        window.push(5.0, "1.1.1.1");
        Decision::from_window(
            &window,
            FeatureVector::default(),
            if is_anomaly { 0.9 } else { 0.1 },
            is_anomaly,
            "connection_count",
        )
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_topic() {
        let sink = JsonLinesSink::new(Vec::new(), KafkaConfig::default());
        assert_ok!(sink.publish(&decision(true)).await);
        assert_ok!(sink.publish(&decision(false)).await);
        assert_ok!(sink.flush().await);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["topic"], "firewall-anomalies");
        assert_eq!(lines[1]["topic"], "firewall-normal");
        assert_eq!(lines[0]["decision"]["reason"], "hike_rate_detected");
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::channel(KafkaConfig::default(), 4);
        assert_ok!(sink.publish(&decision(false)).await);
        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.topic, "firewall-normal");

        drop(rx);
        let err = assert_err!(sink.publish(&decision(false)).await);
        assert!(err.is_collaborator_failure());
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        let sink = TracingSink::new(KafkaConfig::default());
        assert_ok!(sink.publish(&decision(true)).await);
        assert_eq!(sink.name(), "tracing");
    }
}
