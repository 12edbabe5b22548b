//! Per-partition progress tracking.

use super::PartitionOffset;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    handled: Option<i64>,
    committed: Option<i64>,
}

/// Tracks the last handled and last committed offset of every partition.
///
/// Shared between the stream loop and the observability endpoints.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: DashMap<(String, i32), Progress>,
}

impl OffsetTracker {
    /// Create a new offset tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the message at `offset` reached a terminal action.
    pub fn record_handled(&self, topic: &str, partition: i32, offset: i64) {
        let mut entry = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        entry.handled = Some(entry.handled.map_or(offset, |h| h.max(offset)));
    }

    /// Record successfully committed positions.
    pub fn record_committed(&self, positions: &[PartitionOffset]) {
        for position in positions {
            let mut entry = self
                .partitions
                .entry((position.topic.clone(), position.partition))
                .or_default();
            entry.committed = Some(position.offset);
        }
    }

    /// Last handled offset of a partition.
    pub fn handled(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .and_then(|p| p.handled)
    }

    /// Last committed offset of a partition.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .and_then(|p| p.committed)
    }

    /// Number of partitions whose handled progress is not fully committed.
    pub fn uncommitted_partitions(&self) -> usize {
        self.partitions
            .iter()
            .filter(|entry| match (entry.handled, entry.committed) {
                (Some(h), Some(c)) => h > c,
                (Some(_), None) => true,
                _ => false,
            })
            .count()
    }

    /// All tracked partitions, sorted.
    pub fn partitions(&self) -> Vec<(String, i32)> {
        let mut partitions: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        partitions.sort();
        partitions
    }
}
