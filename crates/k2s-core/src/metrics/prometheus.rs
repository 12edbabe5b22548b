//! Prometheus registry for stream loop counters.

use crate::reconcile::Action;
use crate::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Reconcile latency buckets in seconds. Each reconcile is one list plus at most one write.
const RECONCILE_BUCKETS: [f64; 9] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

const ACTION_LABELS: [&str; 4] = ["created", "updated", "skipped", "failed"];

/// Counters, gauges and histograms for the stream loop.
pub struct SyncMetrics {
    registry: Registry,
    messages: IntCounter,
    actions: IntCounterVec,
    decode_errors: IntCounter,
    batches: IntCounter,
    commits: IntCounter,
    commit_failures: IntCounter,
    poll_errors: IntCounter,
    rewinds: IntCounter,
    last_batch_size: IntGauge,
    reconcile_duration: Histogram,
}

impl SyncMetrics {
    /// Create metrics registered in a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new_custom(Some("k2s".to_string()), None)?)
    }

    /// Create metrics registered in the given registry.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let messages = IntCounter::new("messages_total", "Messages consumed from the log")?;
        let actions = IntCounterVec::new(
            Opts::new("reconcile_actions_total", "Reconciliation outcomes by action"),
            &["action"],
        )?;
        let decode_errors = IntCounter::new(
            "decode_errors_total",
            "Messages skipped because the payload could not be decoded",
        )?;
        let batches = IntCounter::new("batches_total", "Non-empty batches processed")?;
        let commits = IntCounter::new("commits_total", "Successful offset commits")?;
        let commit_failures = IntCounter::new("commit_failures_total", "Failed offset commits")?;
        let poll_errors = IntCounter::new("poll_errors_total", "Failed polls")?;
        let rewinds = IntCounter::new(
            "rewinds_total",
            "Partitions rewound to redeliver a failed event",
        )?;
        let last_batch_size = IntGauge::new("last_batch_size", "Messages in the last batch")?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "reconcile_duration_seconds",
                "Time to reconcile one entity against the store",
            )
            .buckets(RECONCILE_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(actions.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(batches.clone()))?;
        registry.register(Box::new(commits.clone()))?;
        registry.register(Box::new(commit_failures.clone()))?;
        registry.register(Box::new(poll_errors.clone()))?;
        registry.register(Box::new(rewinds.clone()))?;
        registry.register(Box::new(last_batch_size.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        // Export every action label from the start, even at zero
        for label in ACTION_LABELS {
            actions.with_label_values(&[label]);
        }

        Ok(Self {
            registry,
            messages,
            actions,
            decode_errors,
            batches,
            commits,
            commit_failures,
            poll_errors,
            rewinds,
            last_batch_size,
            reconcile_duration,
        })
    }

    pub fn record_batch(&self, size: usize) {
        self.batches.inc();
        self.messages.inc_by(size as u64);
        self.last_batch_size.set(size as i64);
    }

    pub fn record_action(&self, action: &Action, elapsed: Duration) {
        self.actions.with_label_values(&[action.as_label()]).inc();
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.inc();
    }

    pub fn record_commit(&self) {
        self.commits.inc();
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.inc();
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.inc();
    }

    pub fn record_rewind(&self) {
        self.rewinds.inc();
    }

    pub fn messages_total(&self) -> u64 {
        self.messages.get()
    }

    /// Count for one action label (`created`, `updated`, `skipped`, `failed`).
    pub fn actions_total(&self, label: &str) -> u64 {
        self.actions.with_label_values(&[label]).get()
    }

    pub fn decode_errors_total(&self) -> u64 {
        self.decode_errors.get()
    }

    pub fn commits_total(&self) -> u64 {
        self.commits.get()
    }

    pub fn commit_failures_total(&self) -> u64 {
        self.commit_failures.get()
    }

    pub fn poll_errors_total(&self) -> u64 {
        self.poll_errors.get()
    }

    pub fn rewinds_total(&self) -> u64 {
        self.rewinds.get()
    }

    /// Export all metrics in Prometheus text format.
    pub fn export_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Metrics(e.to_string()))
    }
}
