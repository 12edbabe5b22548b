//! In-memory store gateway.
//!
//! Records every call and can be told to fail individual operations. Used by
//! the reconciliation and stream loop tests, and handy for local dry runs.

use super::{Ack, StoreGateway};
use crate::error::StoreError;
use crate::model::Entity;
use async_trait::async_trait;
use parking_lot::Mutex;

/// A call observed by [`InMemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall<E> {
    List,
    Create(E),
    Update(E),
}

#[derive(Debug, Default, Clone, Copy)]
struct FailureFlags {
    list: bool,
    create: bool,
    update: bool,
}

/// Store gateway holding entities in a vector.
pub struct InMemoryStore<E: Entity> {
    entities: Mutex<Vec<E>>,
    calls: Mutex<Vec<StoreCall<E>>>,
    failures: Mutex<FailureFlags>,
}

impl<E: Entity> InMemoryStore<E> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_entities(Vec::new())
    }

    /// Create a store pre-populated with entities.
    pub fn with_entities(entities: Vec<E>) -> Self {
        Self {
            entities: Mutex::new(entities),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(FailureFlags::default()),
        }
    }

    /// Current contents.
    pub fn entities(&self) -> Vec<E> {
        self.entities.lock().clone()
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<StoreCall<E>> {
        self.calls.lock().clone()
    }

    /// Number of `create` and `update` calls received.
    pub fn write_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| !matches!(c, StoreCall::List))
            .count()
    }

    /// Number of `list_all` calls received.
    pub fn list_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, StoreCall::List))
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make `list_all` fail (or succeed again).
    pub fn fail_list(&self, fail: bool) {
        self.failures.lock().list = fail;
    }

    /// Make `create` fail (or succeed again).
    pub fn fail_create(&self, fail: bool) {
        self.failures.lock().create = fail;
    }

    /// Make `update` fail (or succeed again).
    pub fn fail_update(&self, fail: bool) {
        self.failures.lock().update = fail;
    }

    fn unavailable(method: &str) -> StoreError {
        StoreError::Status {
            method: method.to_string(),
            url: "memory://store".to_string(),
            status: 503,
            body: "injected failure".to_string(),
        }
    }
}

impl<E: Entity> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity + 'static> StoreGateway<E> for InMemoryStore<E> {
    async fn list_all(&self) -> Result<Vec<E>, StoreError> {
        self.calls.lock().push(StoreCall::List);
        if self.failures.lock().list {
            return Err(Self::unavailable("GET"));
        }
        Ok(self.entities.lock().clone())
    }

    async fn create(&self, entity: &E) -> Result<Ack, StoreError> {
        self.calls.lock().push(StoreCall::Create(entity.clone()));
        if self.failures.lock().create {
            return Err(Self::unavailable("POST"));
        }
        self.entities.lock().push(entity.clone());
        Ok(Ack { status: 201 })
    }

    async fn update(&self, entity: &E) -> Result<Ack, StoreError> {
        self.calls.lock().push(StoreCall::Update(entity.clone()));
        if self.failures.lock().update {
            return Err(Self::unavailable("PUT"));
        }

        let mut entities = self.entities.lock();
        match entities.iter_mut().find(|e| e.id() == entity.id()) {
            Some(existing) => {
                *existing = entity.clone();
                Ok(Ack { status: 200 })
            }
            None => Err(StoreError::Status {
                method: "PUT".to_string(),
                url: format!("memory://store/{}", entity.id()),
                status: 404,
                body: "not found".to_string(),
            }),
        }
    }
}
