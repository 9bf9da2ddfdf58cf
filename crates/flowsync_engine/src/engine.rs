//! The sync engine and its executor.
//!
//! The engine owns the whole [`EngineState`] aggregate behind one mutex.
//! Every mutation is a read-modify-write of the aggregate followed by a
//! snapshot save. The lock is never held across an `.await` and events are
//! emitted only after it is released, so listeners may call back into the
//! engine.
//!
//! # Sync passes
//!
//! [`SyncEngine::trigger_sync`] runs at most one pass at a time. A pass takes
//! a snapshot of the pending operation IDs and submits them serially:
//!
//! ```text
//! pending ──► syncing ──┬── accepted ──► removed (success)
//!                       ├── conflict ──► moved to the conflict store
//!                       └── error ─────► failed ──(backoff)──► pending
//!                                           └──(budget spent)──► parked
//! ```

use crate::bus::{EventBus, Listener, Subscription, Topic};
use crate::config::EngineConfig;
use crate::error::HandlerError;
use crate::handler::{HandlerRegistry, SubmitOutcome};
use crate::store::StateStore;
use chrono::Utc;
use flowsync_protocol::{
    Conflict, EngineState, EntityPayload, Operation, OperationStatus, PassReport, SyncEvent,
    SyncEventKind, SyncStats,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Result of a [`SyncEngine::trigger_sync`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A pass ran to completion.
    Completed(PassReport),
    /// Another pass was already running; nothing was done.
    AlreadyRunning,
    /// The engine is offline; nothing was done.
    Offline,
}

impl PassOutcome {
    /// Returns the report if a pass ran.
    pub fn report(&self) -> Option<PassReport> {
        match self {
            PassOutcome::Completed(report) => Some(*report),
            _ => None,
        }
    }
}

/// The offline-first sync engine.
///
/// Construct it with [`SyncEngine::new`]; the engine is always shared
/// through an `Arc` so background tasks can hold weak references to it.
pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    handlers: HandlerRegistry,
    bus: EventBus,
    state: Mutex<EngineState>,
    persist_failures: AtomicU64,
    this: Weak<SyncEngine>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncEngine")
            .field("storage_key", &self.config.storage_key)
            .field("is_online", &state.is_online)
            .field("is_syncing", &state.is_syncing)
            .field("pending", &state.pending_operations.len())
            .field("conflicts", &state.conflicts.len())
            .finish()
    }
}

impl SyncEngine {
    /// Creates an engine with its own event bus, restoring any snapshot
    /// stored under the configured key.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        handlers: HandlerRegistry,
    ) -> Arc<Self> {
        Self::with_bus(config, store, handlers, EventBus::new())
    }

    /// Creates an engine publishing on an existing bus.
    ///
    /// A snapshot that cannot be decoded is logged and the engine starts
    /// empty. Restored operations caught mid-pass, or waiting out a backoff
    /// delay, become pending again.
    pub fn with_bus(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        handlers: HandlerRegistry,
        bus: EventBus,
    ) -> Arc<Self> {
        let mut state = match store.load(&config.storage_key) {
            Ok(Some(state)) => state,
            Ok(None) => EngineState::default(),
            Err(e) => {
                warn!(key = %config.storage_key, error = %e, "discarding unreadable engine snapshot");
                EngineState::default()
            }
        };

        let recovered = state.recover(config.retry.max_attempts);
        if recovered > 0 {
            info!(recovered, "restored interrupted operations to pending");
        }
        state.is_online = config.initially_online;

        Arc::new_cyclic(|this| Self {
            config,
            store,
            handlers,
            bus,
            state: Mutex::new(state),
            persist_failures: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the handler registry.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Subscribes a listener to a bus topic.
    pub fn subscribe(&self, topic: Topic, listener: Listener) -> Subscription {
        self.bus.subscribe(topic, listener)
    }

    /// Returns a copy of the whole engine state.
    pub fn sync_state(&self) -> EngineState {
        self.state.lock().clone()
    }

    /// Returns the outcome counters.
    pub fn stats(&self) -> SyncStats {
        self.state.lock().stats
    }

    /// Returns true if the engine believes it is online.
    pub fn is_online(&self) -> bool {
        self.state.lock().is_online
    }

    /// Returns true if a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.state.lock().is_syncing
    }

    /// Number of snapshot saves that failed since construction.
    pub fn persist_failure_count(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Reads the state under the lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Applies `f` to the state under the lock, then persists the snapshot.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        self.persist(&state);
        result
    }

    /// Like [`mutate`](Self::mutate), but persists only when `f` reports a change.
    pub(crate) fn mutate_if(&self, f: impl FnOnce(&mut EngineState) -> bool) -> bool {
        let mut state = self.state.lock();
        let changed = f(&mut state);
        if changed {
            self.persist(&state);
        }
        changed
    }

    pub(crate) fn weak(&self) -> Weak<SyncEngine> {
        self.this.clone()
    }

    /// Saves the snapshot. Failures are logged; memory stays authoritative.
    pub(crate) fn persist(&self, state: &EngineState) {
        if let Err(e) = self.store.save(&self.config.storage_key, state) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!(key = %self.config.storage_key, error = %e, "failed to persist engine state");
        }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        self.bus.emit_sync(event);
    }

    /// Starts a pass in the background if online, idle and inside a tokio
    /// runtime. Otherwise does nothing.
    ///
    /// Pairs with [`enqueue_deferred`](Self::enqueue_deferred) for callers
    /// that announce a write before it may be submitted.
    pub fn spawn_sync(&self) {
        {
            let state = self.state.lock();
            if !state.is_online || state.is_syncing {
                return;
            }
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        handle.spawn(async move {
            engine.trigger_sync().await;
        });
    }

    /// Runs one sync pass over a snapshot of the pending queue.
    ///
    /// Returns immediately if a pass is already running or the engine is
    /// offline. Operations that become pending during the pass (new writes,
    /// released retries, requeued conflicts) are left to a follow-up pass
    /// started as this one ends.
    pub async fn trigger_sync(&self) -> PassOutcome {
        let snapshot: Vec<String> = {
            let mut state = self.state.lock();
            if state.is_syncing {
                return PassOutcome::AlreadyRunning;
            }
            if !state.is_online {
                return PassOutcome::Offline;
            }
            state.is_syncing = true;
            self.persist(&state);
            state
                .pending_operations
                .iter()
                .filter(|op| op.is_pending())
                .map(|op| op.id.clone())
                .collect()
        };

        let mut guard = PassGuard {
            engine: self,
            armed: true,
        };
        info!(operations = snapshot.len(), "sync pass started");
        self.emit(SyncEvent::new(SyncEventKind::SyncStarted));

        let mut report = PassReport::default();
        for id in snapshot {
            let Some(claim) = self.claim(&id) else {
                if !self.is_online() {
                    debug!("connectivity lost, ending pass early");
                    break;
                }
                continue;
            };

            report.attempted += 1;
            debug!(
                operation_id = %claim.id,
                entity_type = %claim.entity_type,
                entity_id = %claim.entity_id,
                kind = ?claim.kind,
                "submitting operation"
            );

            let result = match self.handlers.get(claim.entity_type) {
                Some(handler) => handler.submit(&claim).await,
                None => Err(HandlerError::Rejected(format!(
                    "no handler registered for {}",
                    claim.entity_type
                ))),
            };
            self.settle(claim, result, &mut report);
        }

        // Retries released and operations queued while the pass ran were not
        // in its snapshot.
        let follow_up = self.mutate(|state| {
            state.last_sync_time = Some(Utc::now());
            state.is_syncing = false;
            state.pending_operations.iter().any(|op| op.is_pending())
        });
        guard.armed = false;

        info!(
            attempted = report.attempted,
            synced = report.synced,
            conflicted = report.conflicted,
            retried = report.retried,
            parked = report.parked,
            "sync pass completed"
        );
        self.emit(SyncEvent::completed(report));
        if follow_up {
            debug!("operations became pending during the pass, starting another");
            self.spawn_sync();
        }
        PassOutcome::Completed(report)
    }

    /// Clears the last sync time and runs a pass.
    pub async fn force_full_sync(&self) -> PassOutcome {
        self.mutate(|state| state.last_sync_time = None);
        self.trigger_sync().await
    }

    /// Marks a still-pending operation as syncing and returns a copy of it.
    fn claim(&self, id: &str) -> Option<Operation> {
        let mut state = self.state.lock();
        if !state.is_online {
            return None;
        }
        let op = state
            .pending_operations
            .iter_mut()
            .find(|op| op.id == id && op.is_pending())?;
        op.status = OperationStatus::Syncing;
        let claimed = op.clone();
        self.persist(&state);
        Some(claimed)
    }

    fn settle(
        &self,
        op: Operation,
        result: Result<SubmitOutcome, HandlerError>,
        report: &mut PassReport,
    ) {
        match result {
            Ok(SubmitOutcome::Accepted) => self.settle_success(&op, report),
            Ok(SubmitOutcome::Conflict {
                local,
                remote: Some(remote),
            }) => self.settle_conflict(op, local, remote, report),
            Ok(SubmitOutcome::Conflict { remote: None, .. }) => self.settle_failure(
                &op,
                HandlerError::Protocol("conflict reported without a remote snapshot".into()),
                report,
            ),
            Err(error) => self.settle_failure(&op, error, report),
        }
    }

    fn settle_success(&self, op: &Operation, report: &mut PassReport) {
        self.mutate(|state| {
            state.pending_operations.retain(|queued| queued.id != op.id);
            state.stats.record_success();
        });
        report.synced += 1;
        debug!(operation_id = %op.id, "operation synced");
        self.emit(SyncEvent::for_operation(SyncEventKind::OperationSynced, op));
    }

    fn settle_conflict(
        &self,
        op: Operation,
        local: Option<EntityPayload>,
        remote: EntityPayload,
        report: &mut PassReport,
    ) {
        let conflict_id = self.mutate(|state| {
            let mut detached = match state
                .pending_operations
                .iter()
                .position(|queued| queued.id == op.id)
            {
                Some(idx) => state.pending_operations.remove(idx),
                None => op.clone(),
            };
            detached.status = OperationStatus::Failed;

            let local = local.unwrap_or_else(|| detached.payload.clone());
            let conflict = Conflict::new(detached, local, remote);
            let id = conflict.id.clone();
            state.conflicts.push(conflict);
            state.stats.record_conflict();
            id
        });

        report.conflicted += 1;
        warn!(
            operation_id = %op.id,
            conflict_id = %conflict_id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            "conflict detected"
        );
        self.emit(
            SyncEvent::for_operation(SyncEventKind::ConflictDetected, &op).with_conflict(conflict_id),
        );
    }

    fn settle_failure(&self, op: &Operation, error: HandlerError, report: &mut PassReport) {
        let retry = &self.config.retry;
        let outcome = self.mutate(|state| {
            let queued = state
                .pending_operations
                .iter_mut()
                .find(|queued| queued.id == op.id)?;
            queued.retry_count += 1;
            if !error.is_retryable() {
                queued.retry_count = queued.retry_count.max(retry.max_attempts);
            }
            queued.status = OperationStatus::Failed;

            let parked = retry.exhausted(queued.retry_count);
            if parked {
                state.stats.record_failure();
            }
            Some((queued.retry_count, parked))
        });

        let Some((retry_count, parked)) = outcome else {
            debug!(operation_id = %op.id, "failed operation was removed while in flight");
            return;
        };

        if parked {
            report.parked += 1;
            warn!(
                operation_id = %op.id,
                entity_type = %op.entity_type,
                retry_count,
                error = %error,
                "operation parked after exhausting retries"
            );
            self.emit(SyncEvent::for_operation(SyncEventKind::OperationFailed, op));
        } else {
            report.retried += 1;
            let delay = retry.delay_for_attempt(retry_count);
            debug!(
                operation_id = %op.id,
                retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "submission failed, retry scheduled"
            );
            self.schedule_retry(op.id.clone(), delay);
        }
    }

    /// Returns a failed operation to pending after `delay`.
    ///
    /// Outside a tokio runtime the operation is released immediately and
    /// picked up by the next pass.
    fn schedule_retry(&self, id: String, delay: Duration) {
        let Ok(handle) = Handle::try_current() else {
            self.release_retry(&id);
            return;
        };
        let engine = self.this.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                if engine.release_retry(&id) {
                    engine.spawn_sync();
                }
            }
        });
    }

    fn release_retry(&self, id: &str) -> bool {
        let max_attempts = self.config.retry.max_attempts;
        self.mutate(|state| {
            match state.pending_operations.iter_mut().find(|op| op.id == id) {
                Some(op) if op.status == OperationStatus::Failed && !op.is_parked(max_attempts) => {
                    op.status = OperationStatus::Pending;
                    true
                }
                _ => false,
            }
        })
    }
}

/// Resets the pass flags if a pass future is dropped before it finishes.
struct PassGuard<'a> {
    engine: &'a SyncEngine,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.engine.mutate(|state| {
            state.is_syncing = false;
            for op in &mut state.pending_operations {
                if op.status == OperationStatus::Syncing {
                    op.status = OperationStatus::Pending;
                }
            }
        });
        debug!("sync pass abandoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::handler::MockHandler;
    use crate::store::MemoryStateStore;
    use flowsync_protocol::{EntityType, OperationKind, TaskRecord};

    fn task(id: &str) -> EntityPayload {
        EntityPayload::Task(TaskRecord::with_id(id))
    }

    fn engine_with(handler: Arc<MockHandler>, online: bool) -> Arc<SyncEngine> {
        let config = EngineConfig::new("test").with_initially_online(online);
        let handlers = HandlerRegistry::new().register(EntityType::Task, handler);
        SyncEngine::new(config, Arc::new(MemoryStateStore::new()), handlers)
    }

    #[tokio::test]
    async fn offline_pass_is_refused() {
        let handler = Arc::new(MockHandler::new());
        let engine = engine_with(Arc::clone(&handler), false);
        engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();

        assert_eq!(engine.trigger_sync().await, PassOutcome::Offline);
        assert_eq!(handler.call_count(), 0);
        assert_eq!(engine.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pass_drains_pending_queue() {
        let handler = Arc::new(MockHandler::new());
        let engine = engine_with(Arc::clone(&handler), false);
        for id in ["t1", "t2", "t3"] {
            engine
                .enqueue(OperationKind::Create, EntityType::Task, id, task(id))
                .unwrap();
        }
        engine.mutate(|state| state.is_online = true);

        let report = engine.trigger_sync().await.report().unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 3);

        let state = engine.sync_state();
        assert!(state.pending_operations.is_empty());
        assert!(state.last_sync_time.is_some());
        assert!(!state.is_syncing);
        assert_eq!(state.stats.success_count, 3);

        let order: Vec<String> = handler.calls().into_iter().map(|op| op.entity_id).collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn non_retryable_error_parks_immediately() {
        let handler = Arc::new(MockHandler::new());
        handler.push_response(Err(HandlerError::Rejected("invalid title".into())));
        let engine = engine_with(Arc::clone(&handler), false);
        engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        engine.mutate(|state| state.is_online = true);

        let report = engine.trigger_sync().await.report().unwrap();
        assert_eq!(report.parked, 1);

        let state = engine.sync_state();
        assert!(state.pending_operations[0].is_parked(3));
        assert_eq!(state.stats.failure_count, 1);
    }

    #[tokio::test]
    async fn conflict_without_remote_is_a_failure() {
        let handler = Arc::new(MockHandler::new());
        handler.push_response(Ok(SubmitOutcome::Conflict {
            local: None,
            remote: None,
        }));
        let config = EngineConfig::new("test")
            .with_initially_online(false)
            .with_retry(RetryConfig::no_retry());
        let engine = SyncEngine::new(
            config,
            Arc::new(MemoryStateStore::new()),
            HandlerRegistry::new().register(EntityType::Task, handler),
        );
        engine
            .enqueue(OperationKind::Update, EntityType::Task, "t1", task("t1"))
            .unwrap();
        engine.mutate(|state| state.is_online = true);

        engine.trigger_sync().await;

        let state = engine.sync_state();
        assert!(state.conflicts.is_empty());
        assert_eq!(state.stats.failure_count, 1);
        assert_eq!(state.stats.conflict_count, 0);
    }

    #[tokio::test]
    async fn dropped_pass_resets_flags() {
        let handler = Arc::new(MockHandler::new().with_latency(Duration::from_secs(60)));
        let engine = engine_with(Arc::clone(&handler), false);
        engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        engine.mutate(|state| state.is_online = true);

        let pass = engine.trigger_sync();
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pass).await;
        assert!(timed_out.is_err());

        let state = engine.sync_state();
        assert!(!state.is_syncing);
        assert!(state.pending_operations[0].is_pending());
    }
}
