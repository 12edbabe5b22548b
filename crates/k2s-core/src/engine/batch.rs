//! Per-batch bookkeeping: which messages reached a terminal action and what
//! may be committed.

use crate::config::CommitPolicy;
use crate::kafka::{LogMessage, PartitionOffset};
use crate::reconcile::Action;
use std::collections::BTreeMap;

/// Counts of what happened to the messages of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub received: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub malformed: usize,
    /// Messages left undispatched (blocked partition or shutdown)
    pub deferred: usize,
}

impl BatchOutcome {
    /// Messages that reached a terminal action.
    pub fn handled(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed + self.malformed
    }
}

#[derive(Debug, Clone, Default)]
struct PartitionProgress {
    last_handled: Option<i64>,
    blocked_at: Option<i64>,
}

/// Progress of one batch through dispatch.
///
/// Messages of a partition arrive in offset order, so the handled messages of
/// each partition always form a prefix and can be committed as one offset.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    policy: CommitPolicy,
    partitions: BTreeMap<(String, i32), PartitionProgress>,
    outcome: BatchOutcome,
}

impl BatchProgress {
    /// Start tracking a batch of `received` messages.
    pub fn new(policy: CommitPolicy, received: usize) -> Self {
        Self {
            policy,
            partitions: BTreeMap::new(),
            outcome: BatchOutcome {
                received,
                ..BatchOutcome::default()
            },
        }
    }

    fn partition(&mut self, msg: &LogMessage) -> &mut PartitionProgress {
        self.partitions
            .entry((msg.topic.clone(), msg.partition))
            .or_default()
    }

    /// Whether an earlier failure in this partition stops `msg` from being dispatched.
    pub fn is_blocked(&self, msg: &LogMessage) -> bool {
        self.partitions
            .get(&(msg.topic.clone(), msg.partition))
            .map(|p| p.blocked_at.is_some())
            .unwrap_or(false)
    }

    /// Record a message that was left undispatched.
    pub fn record_deferred(&mut self) {
        self.outcome.deferred += 1;
    }

    /// Record a message whose payload could not be decoded. Always terminal.
    pub fn record_malformed(&mut self, msg: &LogMessage) {
        self.outcome.malformed += 1;
        self.partition(msg).last_handled = Some(msg.offset);
    }

    /// Record the reconciliation result of a message.
    pub fn record_action(&mut self, msg: &LogMessage, action: &Action) {
        match action {
            Action::Created => self.outcome.created += 1,
            Action::Updated => self.outcome.updated += 1,
            Action::Skipped => self.outcome.skipped += 1,
            Action::Failed(_) => self.outcome.failed += 1,
        }

        let policy = self.policy;
        let progress = self.partition(msg);
        match (action, policy) {
            (Action::Failed(_), CommitPolicy::OnSuccess) => {
                progress.blocked_at.get_or_insert(msg.offset);
            }
            _ => progress.last_handled = Some(msg.offset),
        }
    }

    /// Last handled offset per partition, ready to commit.
    pub fn commit_positions(&self) -> Vec<PartitionOffset> {
        self.partitions
            .iter()
            .filter_map(|((topic, partition), progress)| {
                progress
                    .last_handled
                    .map(|offset| PartitionOffset::new(topic.clone(), *partition, offset))
            })
            .collect()
    }

    /// Offsets to seek back to so failed events are redelivered.
    pub fn rewind_positions(&self) -> Vec<PartitionOffset> {
        self.partitions
            .iter()
            .filter_map(|((topic, partition), progress)| {
                progress
                    .blocked_at
                    .map(|offset| PartitionOffset::new(topic.clone(), *partition, offset))
            })
            .collect()
    }

    /// Counts so far.
    pub fn outcome(&self) -> BatchOutcome {
        self.outcome
    }
}
