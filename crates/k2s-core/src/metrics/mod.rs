//! Metrics for the stream loop.

mod prometheus;

pub use self::prometheus::SyncMetrics;
