//! The stream loop: poll a batch, reconcile each message, commit progress.
//!
//! Modelled as an explicit state machine:
//!
//! ```text
//! Poll ──empty──▶ Poll
//!  │ batch
//!  ▼
//! Dispatch ──▶ Commit ──▶ Poll
//!
//! any state ──shutdown──▶ Stopped
//! ```
//!
//! Under `CommitPolicy::OnSuccess` a failed event is rewound and polled
//! again. Each consecutive redelivery of the same offset waits longer, using
//! the same backoff as poll failures, so a store that keeps rejecting the
//! event is not retried in a tight loop.
//!
//! Nothing inside the loop is fatal. Decode failures, store failures and
//! commit failures are logged and counted; the loop keeps running until the
//! shutdown signal fires. Shutdown is only observed between messages, so an
//! in-flight store call always completes.

use super::batch::{BatchOutcome, BatchProgress};
use crate::config::{CommitPolicy, Config};
use crate::health::{Component, HealthCheck};
use crate::kafka::{EventSource, LogMessage, OffsetTracker, RetryConfig};
use crate::metrics::SyncMetrics;
use crate::model::{decode_payload, Entity};
use crate::reconcile::{Action, Reconciler};
use crate::store::StoreGateway;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Tuning for the stream loop.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum messages per poll
    pub batch_size: usize,
    /// How long a poll waits for messages
    pub poll_timeout: Duration,
    /// Commit behavior for batches with failed reconciliations
    pub commit_policy: CommitPolicy,
    /// Backoff after failed polls and before redelivering a failed event
    pub retry: RetryConfig,
}

impl SyncOptions {
    /// Options taken from the `kafka` and `sync` configuration sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.kafka.batch_size,
            poll_timeout: Duration::from_millis(config.kafka.poll_timeout_ms),
            commit_policy: config.sync.commit_policy,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// State of the stream loop.
#[derive(Debug)]
pub enum LoopState {
    /// Waiting for the next batch
    Poll,
    /// Reconciling the messages of a batch
    Dispatch(Vec<LogMessage>),
    /// Committing the progress of a dispatched batch
    Commit(BatchProgress),
    /// Shutdown observed; the loop exits
    Stopped,
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::Poll => "poll",
            LoopState::Dispatch(_) => "dispatch",
            LoopState::Commit(_) => "commit",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Consumes entity events and reconciles them against the store.
pub struct SyncEngine<E, L, S> {
    source: L,
    reconciler: Reconciler<E, S>,
    options: SyncOptions,
    offsets: Arc<OffsetTracker>,
    metrics: Arc<SyncMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    stopping: bool,
    poll_failures: u32,
    /// Rewound offset and consecutive redeliveries per (topic, partition)
    redeliveries: HashMap<(String, i32), (i64, u32)>,
    /// Wait before the next poll, set after a rewind
    redelivery_backoff: Duration,
}

impl<E, L, S> SyncEngine<E, L, S>
where
    E: Entity,
    L: EventSource,
    S: StoreGateway<E>,
{
    /// Create a stream loop over an event source and a reconciler.
    pub fn new(source: L, reconciler: Reconciler<E, S>, options: SyncOptions) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            source,
            reconciler,
            options,
            offsets: Arc::new(OffsetTracker::new()),
            metrics: Arc::new(SyncMetrics::new()?),
            health: Arc::new(HealthCheck::new()),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
            stopping: false,
            poll_failures: 0,
            redeliveries: HashMap::new(),
            redelivery_backoff: Duration::ZERO,
        })
    }

    /// Report into shared metrics instead of private ones.
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Report into a shared health registry instead of a private one.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = health;
        self
    }

    /// Track offsets in a shared tracker instead of a private one.
    pub fn with_offsets(mut self, offsets: Arc<OffsetTracker>) -> Self {
        self.offsets = offsets;
        self
    }

    /// Sender that stops the loop at the next state boundary.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    pub fn offsets(&self) -> &Arc<OffsetTracker> {
        &self.offsets
    }

    pub fn source(&self) -> &L {
        &self.source
    }

    /// Run until the shutdown signal fires.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .unwrap_or_else(|| self.shutdown_tx.subscribe());

        self.health.set_running(true);
        info!(
            batch_size = self.options.batch_size,
            poll_timeout_ms = self.options.poll_timeout.as_millis() as u64,
            commit_policy = ?self.options.commit_policy,
            "Stream loop started"
        );

        let mut state = LoopState::Poll;
        loop {
            state = match state {
                LoopState::Stopped => break,
                LoopState::Poll if self.shutdown_requested(&mut shutdown_rx) => LoopState::Stopped,
                LoopState::Poll => {
                    let polled = tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => None,
                        next = self.poll() => Some(next),
                    };
                    match polled {
                        Some(next) => next,
                        None => {
                            self.stopping = true;
                            LoopState::Stopped
                        }
                    }
                }
                LoopState::Dispatch(batch) => {
                    LoopState::Commit(self.dispatch(batch, &mut shutdown_rx).await)
                }
                LoopState::Commit(progress) => {
                    self.commit(progress).await;
                    if self.shutdown_requested(&mut shutdown_rx) {
                        LoopState::Stopped
                    } else {
                        LoopState::Poll
                    }
                }
            };
            debug!(state = state.name(), "Stream loop transition");
        }

        self.health.set_running(false);
        self.shutdown_rx = Some(shutdown_rx);
        info!("Stream loop stopped");
        Ok(())
    }

    /// Poll, dispatch and commit a single batch.
    ///
    /// Returns a default (empty) outcome if the poll produced nothing.
    pub async fn run_once(&mut self) -> BatchOutcome {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        match self.poll().await {
            LoopState::Dispatch(batch) => {
                let progress = self.dispatch(batch, &mut shutdown_rx).await;
                let outcome = progress.outcome();
                self.commit(progress).await;
                outcome
            }
            _ => BatchOutcome::default(),
        }
    }

    fn shutdown_requested(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        if !self.stopping {
            self.stopping = match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => true,
                Err(broadcast::error::TryRecvError::Empty) => false,
                Err(broadcast::error::TryRecvError::Closed) => false,
            };
        }
        self.stopping
    }

    async fn poll(&mut self) -> LoopState {
        let backoff = std::mem::take(&mut self.redelivery_backoff);
        if !backoff.is_zero() {
            tokio::time::sleep(backoff).await;
        }

        match self
            .source
            .poll_batch(self.options.batch_size, self.options.poll_timeout)
            .await
        {
            Ok(batch) => {
                self.poll_failures = 0;
                self.health.mark_healthy(Component::Log);
                if batch.is_empty() {
                    LoopState::Poll
                } else {
                    LoopState::Dispatch(batch)
                }
            }
            Err(e) => {
                self.poll_failures = self.poll_failures.saturating_add(1);
                let backoff = self.options.retry.delay_for(self.poll_failures);
                self.metrics.record_poll_error();
                self.health
                    .mark_unhealthy(Component::Log, format!("Poll failed: {}", e));
                warn!(
                    error = %e,
                    failures = self.poll_failures,
                    backoff_ms = backoff.as_millis() as u64,
                    "Poll failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                LoopState::Poll
            }
        }
    }

    async fn dispatch(
        &mut self,
        batch: Vec<LogMessage>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> BatchProgress {
        let mut progress = BatchProgress::new(self.options.commit_policy, batch.len());
        self.metrics.record_batch(batch.len());
        debug!(size = batch.len(), "Dispatching batch");

        for msg in &batch {
            if self.shutdown_requested(shutdown_rx) || progress.is_blocked(msg) {
                progress.record_deferred();
                continue;
            }

            let entity: E = match decode_payload(msg.value.as_deref()) {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        error = %e,
                        "Skipping undecodable message"
                    );
                    self.metrics.record_decode_error();
                    progress.record_malformed(msg);
                    continue;
                }
            };

            info!(
                id = %entity.id(),
                partition = msg.partition,
                offset = msg.offset,
                "Received entity"
            );

            let start = Instant::now();
            let action = self.reconciler.reconcile(&entity).await;
            self.metrics.record_action(&action, start.elapsed());

            match &action {
                Action::Failed(reason) => {
                    self.health
                        .mark_degraded(Component::Store, reason.to_string());
                    if self.options.commit_policy == CommitPolicy::Always {
                        warn!(
                            id = %entity.id(),
                            offset = msg.offset,
                            "Failed event will be committed and not redelivered"
                        );
                    }
                }
                _ => self.health.mark_healthy(Component::Store),
            }

            progress.record_action(msg, &action);
        }

        progress
    }

    async fn commit(&mut self, progress: BatchProgress) {
        let outcome = progress.outcome();
        let positions = progress.commit_positions();

        for position in &positions {
            self.offsets
                .record_handled(&position.topic, position.partition, position.offset);
            self.redeliveries
                .remove(&(position.topic.clone(), position.partition));
        }

        let committed = if positions.is_empty() {
            false
        } else {
            match self.source.commit(&positions).await {
                Ok(()) => {
                    self.metrics.record_commit();
                    self.health.record_commit();
                    self.offsets.record_committed(&positions);
                    true
                }
                Err(e) => {
                    self.metrics.record_commit_failure();
                    self.health
                        .mark_degraded(Component::Log, format!("Commit failed: {}", e));
                    error!(error = %e, offsets = ?positions, "Offset commit failed");
                    false
                }
            }
        };

        for position in progress.rewind_positions() {
            let key = (position.topic.clone(), position.partition);
            match self.source.rewind(&position).await {
                Ok(()) => {
                    self.metrics.record_rewind();
                    let attempts = match self.redeliveries.get(&key) {
                        Some(&(offset, count)) if offset == position.offset => {
                            count.saturating_add(1)
                        }
                        _ => 1,
                    };
                    self.redeliveries.insert(key, (position.offset, attempts));

                    let backoff = self.options.retry.delay_for(attempts);
                    self.redelivery_backoff = self.redelivery_backoff.max(backoff);
                    warn!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed event will be redelivered after backoff"
                    );
                }
                Err(e) => {
                    self.redeliveries.remove(&key);
                    error!(
                        error = %e,
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        "Rewind failed, failed event may not be redelivered"
                    );
                }
            }
        }

        info!(
            received = outcome.received,
            created = outcome.created,
            updated = outcome.updated,
            skipped = outcome.skipped,
            failed = outcome.failed,
            malformed = outcome.malformed,
            deferred = outcome.deferred,
            committed,
            "Batch processed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::kafka::PartitionOffset;
    use crate::model::Product;
    use crate::store::{Ack, InMemoryStore, StoreCall};
    use crate::{Error, KafkaError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Event source replaying scripted poll results.
    #[derive(Default)]
    struct ScriptedSource {
        polls: Mutex<VecDeque<Result<Vec<LogMessage>>>>,
        poll_count: AtomicUsize,
        commits: Mutex<Vec<Vec<PartitionOffset>>>,
        rewinds: Mutex<Vec<PartitionOffset>>,
        fail_commits: AtomicBool,
        on_exhausted: Mutex<Option<broadcast::Sender<()>>>,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Result<Vec<LogMessage>>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn poll_batch(&self, _max: usize, _timeout: Duration) -> Result<Vec<LogMessage>> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            let next = self.polls.lock().pop_front();
            match next {
                Some(result) => result,
                None => {
                    if let Some(tx) = self.on_exhausted.lock().take() {
                        let _ = tx.send(());
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn commit(&self, handled: &[PartitionOffset]) -> Result<()> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(Error::Kafka(KafkaError::OffsetCommit(
                    "coordinator unavailable".into(),
                )));
            }
            self.commits.lock().push(handled.to_vec());
            Ok(())
        }

        async fn rewind(&self, position: &PartitionOffset) -> Result<()> {
            self.rewinds.lock().push(position.clone());
            Ok(())
        }
    }

    /// Event source holding a single event that comes back after each rewind.
    struct RedeliveringSource {
        message: LogMessage,
        pending: Mutex<Option<LogMessage>>,
        commits: Mutex<Vec<Vec<PartitionOffset>>>,
    }

    impl RedeliveringSource {
        fn new(message: LogMessage) -> Self {
            Self {
                pending: Mutex::new(Some(message.clone())),
                message,
                commits: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventSource for RedeliveringSource {
        async fn poll_batch(&self, _max: usize, _timeout: Duration) -> Result<Vec<LogMessage>> {
            let next = self.pending.lock().take();
            match next {
                Some(msg) => Ok(vec![msg]),
                None => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn commit(&self, handled: &[PartitionOffset]) -> Result<()> {
            self.commits.lock().push(handled.to_vec());
            Ok(())
        }

        async fn rewind(&self, position: &PartitionOffset) -> Result<()> {
            assert_eq!(position.offset, self.message.offset);
            *self.pending.lock() = Some(self.message.clone());
            Ok(())
        }
    }

    fn create_count(store: &InMemoryStore<Product>) -> usize {
        store
            .calls()
            .iter()
            .filter(|call| matches!(call, StoreCall::Create(_)))
            .count()
    }

    /// Store that fires the shutdown signal when it receives a create.
    struct SignallingStore {
        inner: InMemoryStore<Product>,
        on_create: Mutex<Option<broadcast::Sender<()>>>,
    }

    #[async_trait]
    impl StoreGateway<Product> for SignallingStore {
        async fn list_all(&self) -> std::result::Result<Vec<Product>, StoreError> {
            self.inner.list_all().await
        }

        async fn create(&self, entity: &Product) -> std::result::Result<Ack, StoreError> {
            if let Some(tx) = self.on_create.lock().take() {
                let _ = tx.send(());
            }
            self.inner.create(entity).await
        }

        async fn update(&self, entity: &Product) -> std::result::Result<Ack, StoreError> {
            self.inner.update(entity).await
        }
    }

    fn polo() -> Product {
        Product::new(
            3,
            "Poloshirt, Kurzarm (2er Pack)",
            25.99,
            "https://image01.bonprix.de/assets/275x385/1684855332/23077857-j6aULXSb.webp",
        )
    }

    fn hat() -> Product {
        Product::new(7, "Hat", 9.99, "x")
    }

    fn message(partition: i32, offset: i64, payload: &[u8]) -> LogMessage {
        LogMessage {
            key: None,
            value: Some(payload.to_vec()),
            topic: "products".to_string(),
            partition,
            offset,
            timestamp: 0,
        }
    }

    fn event(partition: i32, offset: i64, product: &Product) -> LogMessage {
        message(partition, offset, &serde_json::to_vec(product).unwrap())
    }

    fn options(policy: CommitPolicy) -> SyncOptions {
        SyncOptions {
            batch_size: 100,
            poll_timeout: Duration::from_millis(10),
            commit_policy: policy,
            retry: RetryConfig::fixed(Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    fn engine<S: StoreGateway<Product>>(
        source: ScriptedSource,
        store: Arc<S>,
        policy: CommitPolicy,
    ) -> SyncEngine<Product, ScriptedSource, S> {
        SyncEngine::new(source, Reconciler::new(store), options(policy)).unwrap()
    }

    #[tokio::test]
    async fn batch_is_reconciled_in_order_and_committed() {
        let store = Arc::new(InMemoryStore::with_entities(vec![polo()]));
        let source = ScriptedSource::new(vec![Ok(vec![
            event(0, 0, &polo()),
            event(0, 1, &hat()),
            event(0, 2, &polo().with_price(19.99)),
        ])]);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);

        let outcome = engine.run_once().await;

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::List,
                StoreCall::List,
                StoreCall::Create(hat()),
                StoreCall::List,
                StoreCall::Update(polo().with_price(19.99)),
            ]
        );
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![PartitionOffset::new("products", 0, 2)]]
        );
        assert_eq!(engine.offsets().committed("products", 0), Some(2));
        assert_eq!(engine.metrics().actions_total("created"), 1);
    }

    #[tokio::test]
    async fn malformed_message_does_not_abort_batch() {
        let store = Arc::new(InMemoryStore::new());
        let source = ScriptedSource::new(vec![Ok(vec![
            message(0, 10, b"{\"id\": 7}"),
            event(0, 11, &hat()),
        ])]);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);

        let outcome = engine.run_once().await;

        assert_eq!(outcome.malformed, 1);
        assert_eq!(outcome.created, 1);
        assert_eq!(store.entities(), vec![hat()]);
        assert_eq!(engine.metrics().decode_errors_total(), 1);
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![PartitionOffset::new("products", 0, 11)]]
        );
    }

    #[tokio::test]
    async fn snapshot_failure_is_committed_under_always() {
        let store = Arc::new(InMemoryStore::with_entities(vec![polo()]));
        store.fail_list(true);
        let source = ScriptedSource::new(vec![Ok(vec![event(0, 4, &hat())])]);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);

        let outcome = engine.run_once().await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(store.write_count(), 0);
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![PartitionOffset::new("products", 0, 4)]]
        );
        assert!(engine.source().rewinds.lock().is_empty());
    }

    #[tokio::test]
    async fn on_success_rewinds_failed_partition() {
        let store = Arc::new(InMemoryStore::with_entities(vec![polo()]));
        store.fail_create(true);
        let scarf = Product::new(8, "Scarf", 15.0, "y");
        let source = ScriptedSource::new(vec![Ok(vec![
            event(0, 5, &polo()),
            event(0, 6, &hat()),
            event(1, 3, &polo()),
            event(0, 7, &scarf),
        ])]);
        let mut engine = engine(source, store.clone(), CommitPolicy::OnSuccess);

        let outcome = engine.run_once().await;

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.deferred, 1);
        assert!(!store.calls().contains(&StoreCall::Create(scarf)));
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![
                PartitionOffset::new("products", 0, 5),
                PartitionOffset::new("products", 1, 3),
            ]]
        );
        assert_eq!(
            *engine.source().rewinds.lock(),
            vec![PartitionOffset::new("products", 0, 6)]
        );
        assert_eq!(engine.metrics().rewinds_total(), 1);
    }

    #[tokio::test]
    async fn commit_failure_keeps_loop_running() {
        let store = Arc::new(InMemoryStore::new());
        let source = ScriptedSource::new(vec![
            Ok(vec![event(0, 0, &hat())]),
            Ok(vec![event(0, 1, &hat().with_price(1.0))]),
        ]);
        source.fail_commits.store(true, Ordering::SeqCst);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);
        *engine.source().on_exhausted.lock() = Some(engine.shutdown_signal());

        engine.run().await.unwrap();

        assert_eq!(store.entities(), vec![hat().with_price(1.0)]);
        assert_eq!(engine.metrics().commit_failures_total(), 2);
        assert_eq!(engine.offsets().committed("products", 0), None);
        assert!(!engine.health().is_running());
    }

    #[tokio::test]
    async fn poll_error_backs_off_and_recovers() {
        let store = Arc::new(InMemoryStore::new());
        let source = ScriptedSource::new(vec![
            Err(Error::Kafka(KafkaError::ConsumerGroup("broker down".into()))),
            Ok(vec![event(0, 0, &hat())]),
        ]);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);
        *engine.source().on_exhausted.lock() = Some(engine.shutdown_signal());

        engine.run().await.unwrap();

        assert_eq!(engine.metrics().poll_errors_total(), 1);
        assert_eq!(store.entities(), vec![hat()]);
        assert_eq!(engine.metrics().commits_total(), 1);
    }

    #[tokio::test]
    async fn shutdown_before_run_stops_without_polling() {
        let store = Arc::new(InMemoryStore::new());
        let mut engine = engine(ScriptedSource::new(vec![]), store, CommitPolicy::Always);
        engine.shutdown_signal().send(()).unwrap();

        engine.run().await.unwrap();

        assert_eq!(engine.source().poll_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_during_dispatch_finishes_current_message() {
        let store = Arc::new(SignallingStore {
            inner: InMemoryStore::new(),
            on_create: Mutex::new(None),
        });
        let scarf = Product::new(8, "Scarf", 15.0, "y");
        let source = ScriptedSource::new(vec![
            Ok(vec![event(0, 0, &hat()), event(0, 1, &scarf)]),
            Ok(vec![event(0, 2, &polo())]),
        ]);
        let mut engine = engine(source, store.clone(), CommitPolicy::Always);
        *store.on_create.lock() = Some(engine.shutdown_signal());

        engine.run().await.unwrap();

        assert_eq!(store.inner.entities(), vec![hat()]);
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![PartitionOffset::new("products", 0, 0)]]
        );
        assert_eq!(engine.source().poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_redelivery_is_retried_with_backoff() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_create(true);
        let source = RedeliveringSource::new(event(0, 9, &hat()));
        let mut options = options(CommitPolicy::OnSuccess);
        options.retry = RetryConfig::fixed(Duration::from_millis(20), Duration::from_millis(20));
        let mut engine =
            SyncEngine::new(source, Reconciler::new(store.clone()), options).unwrap();

        let shutdown = engine.shutdown_signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = shutdown.send(());
        });
        engine.run().await.unwrap();

        // One immediate attempt, then at most one per 20ms backoff
        let attempts = create_count(&store);
        assert!(attempts >= 2, "attempts: {}", attempts);
        assert!(attempts <= 12, "attempts: {}", attempts);
        assert!(engine.source().commits.lock().is_empty());
        assert!(store.entities().is_empty());
    }

    #[tokio::test]
    async fn redelivery_backoff_grows_then_resets_on_commit() {
        let store = Arc::new(InMemoryStore::<Product>::new());
        store.fail_create(true);
        let source = RedeliveringSource::new(event(0, 9, &hat()));
        let mut options = options(CommitPolicy::OnSuccess);
        options.retry = RetryConfig::fixed(Duration::from_millis(2), Duration::from_millis(50));
        let mut engine =
            SyncEngine::new(source, Reconciler::new(store.clone()), options).unwrap();
        let key = ("products".to_string(), 0);

        assert_eq!(engine.run_once().await.failed, 1);
        assert_eq!(engine.redeliveries.get(&key), Some(&(9, 1)));
        assert_eq!(engine.redelivery_backoff, Duration::from_millis(2));

        assert_eq!(engine.run_once().await.failed, 1);
        assert_eq!(engine.redeliveries.get(&key), Some(&(9, 2)));
        assert_eq!(engine.redelivery_backoff, Duration::from_millis(4));

        store.fail_create(false);
        assert_eq!(engine.run_once().await.created, 1);
        assert!(engine.redeliveries.is_empty());
        assert_eq!(engine.redelivery_backoff, Duration::ZERO);
        assert_eq!(
            *engine.source().commits.lock(),
            vec![vec![PartitionOffset::new("products", 0, 9)]]
        );
        assert_eq!(engine.metrics().rewinds_total(), 2);
    }
}
