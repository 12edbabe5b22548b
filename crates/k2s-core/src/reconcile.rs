//! Reconciliation of one incoming entity against the store.
//!
//! The decision is made from a freshly fetched snapshot, never from a local
//! cache, so external writers of the store are always observed:
//!
//! 1. list the store; on failure the event fails with no writes
//! 2. find the stored entity with the same identity
//! 3. absent: create it
//! 4. present and equal: skip (replays of an unchanged event are no-ops)
//! 5. present and different: update it
//!
//! A concurrent external write between the snapshot and the write is
//! overwritten. That race is accepted; running several workers requires
//! serializing events per identity (e.g. keying log messages by id).

use crate::error::StoreError;
use crate::model::Entity;
use crate::store::StoreGateway;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of reconciling one entity.
#[derive(Debug)]
pub enum Action {
    /// Entity was absent and has been created
    Created,
    /// Entity differed and has been updated
    Updated,
    /// Entity already matched the store
    Skipped,
    /// Reconciliation did not complete
    Failed(FailureReason),
}

impl Action {
    /// Whether the store now reflects the incoming entity.
    pub fn is_success(&self) -> bool {
        !matches!(self, Action::Failed(_))
    }

    /// Whether a write was issued and acknowledged.
    pub fn is_write(&self) -> bool {
        matches!(self, Action::Created | Action::Updated)
    }

    /// Short lowercase name, used as a log field and metric label.
    pub fn as_label(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Skipped => "skipped",
            Action::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_label()),
        }
    }
}

/// Why a reconciliation failed.
#[derive(Debug)]
pub enum FailureReason {
    /// The store snapshot could not be read; no write was attempted
    Snapshot(StoreError),
    /// The create call failed
    Create(StoreError),
    /// The update call failed
    Update(StoreError),
}

impl FailureReason {
    /// Underlying store error.
    pub fn error(&self) -> &StoreError {
        match self {
            FailureReason::Snapshot(e) | FailureReason::Create(e) | FailureReason::Update(e) => e,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Snapshot(e) => write!(f, "snapshot read failed: {}", e),
            FailureReason::Create(e) => write!(f, "create failed: {}", e),
            FailureReason::Update(e) => write!(f, "update failed: {}", e),
        }
    }
}

/// Decides and performs the single store write an incoming entity needs.
pub struct Reconciler<E, S> {
    store: Arc<S>,
    _entity: PhantomData<fn(E)>,
}

impl<E, S> Reconciler<E, S>
where
    E: Entity,
    S: StoreGateway<E>,
{
    /// Create a reconciler over an injected store gateway.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// Reconcile one incoming entity. Issues at most one write.
    pub async fn reconcile(&self, incoming: &E) -> Action {
        let start = Instant::now();
        let id = incoming.id();

        let snapshot = match self.store.list_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(id = %id, error = %e, "Store snapshot failed, event not reconciled");
                return Action::Failed(FailureReason::Snapshot(e));
            }
        };

        let action = match snapshot.iter().find(|existing| existing.id() == id) {
            None => {
                info!(id = %id, "Adding new entity");
                match self.store.create(incoming).await {
                    Ok(_) => Action::Created,
                    Err(e) => Action::Failed(FailureReason::Create(e)),
                }
            }
            Some(existing) if existing == incoming => Action::Skipped,
            Some(_) => {
                info!(id = %id, "Updating entity");
                match self.store.update(incoming).await {
                    Ok(_) => Action::Updated,
                    Err(e) => Action::Failed(FailureReason::Update(e)),
                }
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &action {
            Action::Failed(reason) => {
                warn!(id = %id, error = %reason, elapsed_ms, "Reconciliation failed")
            }
            other => debug!(
                id = %id,
                action = other.as_label(),
                snapshot_size = snapshot.len(),
                elapsed_ms,
                "Entity reconciled"
            ),
        }

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Product;
    use crate::store::{InMemoryStore, StoreCall};

    fn polo() -> Product {
        Product::new(
            3,
            "Poloshirt, Kurzarm (2er Pack)",
            25.99,
            "https://image01.bonprix.de/assets/275x385/1684855332/23077857-j6aULXSb.webp",
        )
    }

    fn reconciler(
        entities: Vec<Product>,
    ) -> (
        Reconciler<Product, InMemoryStore<Product>>,
        Arc<InMemoryStore<Product>>,
    ) {
        let store = Arc::new(InMemoryStore::with_entities(entities));
        (Reconciler::new(store.clone()), store)
    }

    #[tokio::test]
    async fn identical_entity_is_skipped_without_writes() {
        let (reconciler, store) = reconciler(vec![polo()]);

        let action = reconciler.reconcile(&polo()).await;

        assert!(matches!(action, Action::Skipped));
        assert_eq!(store.list_count(), 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn absent_entity_is_created_with_exact_payload() {
        let (reconciler, store) = reconciler(vec![polo()]);
        let hat = Product::new(7, "Hat", 9.99, "x");

        let action = reconciler.reconcile(&hat).await;

        assert!(matches!(action, Action::Created));
        assert_eq!(store.calls(), vec![StoreCall::List, StoreCall::Create(hat)]);
    }

    #[tokio::test]
    async fn changed_entity_is_updated_never_created() {
        let (reconciler, store) = reconciler(vec![polo()]);
        let cheaper = polo().with_price(19.99);

        let action = reconciler.reconcile(&cheaper).await;

        assert!(matches!(action, Action::Updated));
        assert_eq!(
            store.calls(),
            vec![StoreCall::List, StoreCall::Update(cheaper.clone())]
        );
        assert_eq!(store.entities(), vec![cheaper]);
    }

    #[tokio::test]
    async fn replay_is_idempotent() {
        let (reconciler, store) = reconciler(vec![]);
        let hat = Product::new(7, "Hat", 9.99, "x");

        assert!(matches!(reconciler.reconcile(&hat).await, Action::Created));
        assert!(matches!(reconciler.reconcile(&hat).await, Action::Skipped));
        assert!(matches!(reconciler.reconcile(&hat).await, Action::Skipped));
        assert_eq!(store.write_count(), 1);

        let changed = hat.with_price(7.5);
        assert!(matches!(reconciler.reconcile(&changed).await, Action::Updated));
        assert!(matches!(reconciler.reconcile(&changed).await, Action::Skipped));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn snapshot_failure_issues_no_writes() {
        let (reconciler, store) = reconciler(vec![]);
        store.fail_list(true);

        let action = reconciler.reconcile(&Product::new(7, "Hat", 9.99, "x")).await;

        match action {
            Action::Failed(FailureReason::Snapshot(e)) => assert_eq!(e.status(), Some(503)),
            other => panic!("unexpected action: {:?}", other),
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn write_failures_are_reported() {
        let (reconciler, store) = reconciler(vec![polo()]);
        store.fail_create(true);
        store.fail_update(true);

        let created = reconciler.reconcile(&Product::new(7, "Hat", 9.99, "x")).await;
        let updated = reconciler.reconcile(&polo().with_price(1.0)).await;

        assert!(matches!(created, Action::Failed(FailureReason::Create(_))));
        assert!(matches!(updated, Action::Failed(FailureReason::Update(_))));
        assert!(!created.is_success());
        assert_eq!(store.entities(), vec![polo()]);
    }

    #[test]
    fn action_labels() {
        assert_eq!(Action::Created.to_string(), "created");
        assert!(Action::Updated.is_write());
        assert!(Action::Skipped.is_success());
        assert!(!Action::Skipped.is_write());
    }
}
