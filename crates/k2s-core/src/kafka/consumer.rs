//! Kafka event source backed by an rdkafka `StreamConsumer`.
//!
//! Offsets are never committed automatically: the stream loop commits after
//! a batch has been reconciled. Poll failures are reported to the caller,
//! which backs off using [`RetryConfig`].

use super::{EventSource, LogMessage, PartitionOffset};
use crate::config::KafkaConfig;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a seek may block waiting for the broker.
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exponential backoff for repeated failures.
///
/// Delay for attempt `n` (starting at 1) is `base * 2^(n-1)`, capped at
/// `max_delay`, with up to ±`jitter_percent` applied.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure (default: 100ms)
    pub base_delay: Duration,
    /// Upper bound for any delay (default: 30s)
    pub max_delay: Duration,
    /// Jitter as a percentage of the delay, 0 disables it (default: 25)
    pub jitter_percent: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_percent: 25,
        }
    }
}

impl RetryConfig {
    /// Create a retry config without jitter.
    pub fn fixed(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_percent: 0,
        }
    }

    /// Delay to wait after `attempt` consecutive failures.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if self.jitter_percent == 0 {
            return delay;
        }

        let spread_ms = delay.as_millis() as u64 * u64::from(self.jitter_percent.min(100)) / 100;
        if spread_ms == 0 {
            return delay;
        }
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        let offset_ms = seed % (spread_ms * 2 + 1);

        (delay + Duration::from_millis(offset_ms)).saturating_sub(Duration::from_millis(spread_ms))
    }
}

/// Builder for [`KafkaEventSource`].
pub struct KafkaEventSourceBuilder {
    config: KafkaConfig,
}

impl KafkaEventSourceBuilder {
    /// Create a new builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Create the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<KafkaEventSource> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Progress is committed by the stream loop after reconciliation
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky");

        apply_security(&mut client_config, &self.config);

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(KafkaEventSource {
            consumer: Arc::new(consumer),
            topic: self.config.topic,
        })
    }
}

/// Copy SASL/SSL settings onto a client configuration.
pub(crate) fn apply_security(client_config: &mut ClientConfig, config: &KafkaConfig) {
    let security = &config.security;
    if let Some(ref protocol) = security.protocol {
        client_config.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = security.sasl_mechanism {
        client_config.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = security.sasl_username {
        client_config.set("sasl.username", username);
    }
    if let Some(ref password) = security.sasl_password {
        client_config.set("sasl.password", password);
    }
    if let Some(ref path) = security.ssl_ca_location {
        client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
    }
}

/// Kafka consumer exposed as an [`EventSource`].
///
/// Commits and seeks block inside librdkafka, so they run on the blocking
/// pool rather than on a runtime worker.
pub struct KafkaEventSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaEventSource {
    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn convert_message(msg: &BorrowedMessage) -> LogMessage {
        LogMessage {
            key: msg.key().map(|k| k.to_vec()),
            value: msg.payload().map(|v| v.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
        }
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll_batch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<LogMessage>> {
        let mut batch = Vec::with_capacity(max_messages.min(1024));
        let deadline = tokio::time::Instant::now() + timeout;
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        let mut attempted = false;
        while batch.len() < max_messages {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            // The first read always happens, even with an elapsed deadline
            if remaining.is_zero() && attempted {
                break;
            }
            attempted = true;

            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(msg))) => batch.push(Self::convert_message(&msg)),
                Ok(Some(Err(e))) if batch.is_empty() => {
                    return Err(Error::Kafka(KafkaError::ConsumerGroup(e.to_string())));
                }
                // Keep what was already read; the error resurfaces on the next poll
                Ok(Some(Err(_))) => break,
                Ok(None) => return Err(Error::Kafka(KafkaError::ConsumerClosed)),
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    async fn commit(&self, handled: &[PartitionOffset]) -> Result<()> {
        if handled.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for position in handled {
            // Committed offset is the next offset to read
            tpl.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.offset + 1),
            )
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(offsets = ?handled, "Offsets committed");
        Ok(())
    }

    async fn rewind(&self, position: &PartitionOffset) -> Result<()> {
        let seek_error = |message: String| {
            Error::Kafka(KafkaError::Seek {
                topic: position.topic.clone(),
                partition: position.partition,
                offset: position.offset,
                message,
            })
        };

        let consumer = Arc::clone(&self.consumer);
        let (topic, partition, offset) =
            (position.topic.clone(), position.partition, position.offset);
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| seek_error(e.to_string()))?
        .map_err(|e| seek_error(e.to_string()))?;

        info!(
            topic = %position.topic,
            partition = position.partition,
            offset = position.offset,
            "Partition rewound for redelivery"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> KafkaEventSource {
        // librdkafka connects lazily, so no broker is needed to build one
        KafkaEventSourceBuilder::new(KafkaConfig::default())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_rewind_unassigned_partition_is_seek_error() {
        let source = source();
        let position = PartitionOffset::new("products", 0, 42);

        let err = source.rewind(&position).await.unwrap_err();

        match err {
            Error::Kafka(KafkaError::Seek {
                partition, offset, ..
            }) => {
                assert_eq!(partition, 0);
                assert_eq!(offset, 42);
            }
            other => panic!("expected seek error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_nothing_is_noop() {
        let source = source();
        assert_eq!(source.topic(), "products");
        assert!(source.commit(&[]).await.is_ok());
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.jitter_percent, 25);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let config = RetryConfig::fixed(Duration::from_millis(100), Duration::from_secs(30));

        assert_eq!(config.delay_for(0), Duration::ZERO);
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::fixed(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(config.delay_for(10), Duration::from_secs(5));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_percent: 25,
        };

        for _ in 0..20 {
            let delay = config.delay_for(1);
            assert!(delay >= Duration::from_millis(750), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1250), "{:?}", delay);
        }
    }
}
