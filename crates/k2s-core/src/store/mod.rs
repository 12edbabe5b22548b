//! Remote entity store access.
//!
//! The [`StoreGateway`] trait is the seam between reconciliation and the
//! store: list the full current state, create, update. Implementations never
//! retry; retry policy belongs to the caller.

mod http;
mod memory;

pub use http::HttpStoreGateway;
pub use memory::{InMemoryStore, StoreCall};

use crate::error::StoreError;
use crate::model::Entity;
use async_trait::async_trait;

/// Acknowledgement of a successful store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// HTTP status returned by the store
    pub status: u16,
}

/// Operations the reconciler needs from the remote store.
#[async_trait]
pub trait StoreGateway<E: Entity>: Send + Sync {
    /// Fetch the complete current set of entities.
    async fn list_all(&self) -> Result<Vec<E>, StoreError>;

    /// Create a new entity.
    async fn create(&self, entity: &E) -> Result<Ack, StoreError>;

    /// Replace the stored entity with the same identity.
    async fn update(&self, entity: &E) -> Result<Ack, StoreError>;
}
