//! Kafka plumbing: the event source consumed by the stream loop and offset tracking.

mod consumer;
mod offset;

pub use consumer::{KafkaEventSource, KafkaEventSourceBuilder, RetryConfig};
pub use offset::OffsetTracker;

pub(crate) use consumer::apply_security;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A message read from the log.
///
/// Position metadata (topic, partition, offset) is only used for commit
/// sequencing and logging.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Message key (optional)
    pub key: Option<Vec<u8>>,

    /// Message value (optional)
    pub value: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Message timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl LogMessage {
    /// Get the message key as a string.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Position of this message.
    pub fn position(&self) -> PartitionOffset {
        PartitionOffset::new(self.topic.clone(), self.partition, self.offset)
    }
}

/// An offset within one topic partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl PartitionOffset {
    /// Create a partition offset.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

/// Source of log messages with manually committed progress.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait up to `timeout` for at most `max_messages` messages.
    ///
    /// An empty batch is not an error.
    async fn poll_batch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<LogMessage>>;

    /// Durably record that every message up to and including each given
    /// offset has been handled.
    async fn commit(&self, handled: &[PartitionOffset]) -> Result<()>;

    /// Move the read position of a partition back so that the message at
    /// `position.offset` is delivered again.
    async fn rewind(&self, position: &PartitionOffset) -> Result<()>;
}
