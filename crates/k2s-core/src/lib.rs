//! K2S Core - Kafka to store entity synchronization
//!
//! This library consumes entity-change events from Apache Kafka and
//! reconciles each one against a remote HTTP entity store:
//!
//! - One snapshot read per event, then at most one create or update
//! - Unchanged entities are skipped without writes
//! - Offsets committed only after a batch has been handled
//! - Configurable commit policy for failed reconciliations

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod model;
pub mod publisher;
pub mod reconcile;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{DecodeError, KafkaError, StoreError};
pub use error::{Error, Result};
pub use model::{Entity, Product};
