//! Stream loop that drives reconciliation from the log.

mod batch;
mod stream_loop;

pub use batch::{BatchOutcome, BatchProgress};
pub use stream_loop::{LoopState, SyncEngine, SyncOptions};

use crate::config::Config;
use crate::kafka::{KafkaEventSource, KafkaEventSourceBuilder};
use crate::model::Product;
use crate::reconcile::Reconciler;
use crate::store::HttpStoreGateway;
use crate::Result;
use std::sync::Arc;

/// Stream loop for the product topic against the HTTP store.
pub type ProductSyncEngine = SyncEngine<Product, KafkaEventSource, HttpStoreGateway>;

/// Wire a product stream loop from configuration.
///
/// Validates the configuration, subscribes the consumer and builds the
/// store client. Nothing is polled until [`SyncEngine::run`] is called.
pub fn build_product_engine(config: &Config) -> Result<ProductSyncEngine> {
    config.validate()?;

    let store = Arc::new(HttpStoreGateway::new(&config.store)?);
    let source = KafkaEventSourceBuilder::new(config.kafka.clone()).build()?;

    SyncEngine::new(source, Reconciler::new(store), SyncOptions::from_config(config))
}
