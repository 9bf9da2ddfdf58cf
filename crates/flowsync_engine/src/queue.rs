//! Operation queue operations on the engine.

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use flowsync_protocol::{
    EntityPayload, EntityType, Operation, OperationKind, OperationStatus, SyncEvent,
    SyncEventKind, SyncStats,
};
use tracing::{debug, info};

impl SyncEngine {
    /// Appends a pending operation and returns its ID.
    ///
    /// Queueing succeeds regardless of connectivity. When online and idle
    /// inside a tokio runtime, a pass is started in the background.
    ///
    /// # Errors
    ///
    /// - `UnregisteredEntity` if no handler is registered for `entity_type`
    /// - `PayloadMismatch` if `payload` is not a record of `entity_type`
    pub fn enqueue(
        &self,
        kind: OperationKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: EntityPayload,
    ) -> EngineResult<String> {
        let id = self.enqueue_deferred(kind, entity_type, entity_id, payload)?;
        self.spawn_sync();
        Ok(id)
    }

    /// Appends a pending operation without starting a pass.
    ///
    /// The operation cannot be submitted, and so cannot be reported as
    /// synced, until the caller (or a later trigger) starts a pass with
    /// [`spawn_sync`](Self::spawn_sync).
    ///
    /// # Errors
    ///
    /// Same as [`enqueue`](Self::enqueue).
    pub fn enqueue_deferred(
        &self,
        kind: OperationKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: EntityPayload,
    ) -> EngineResult<String> {
        if !self.handlers().contains(entity_type) {
            return Err(EngineError::UnregisteredEntity(entity_type));
        }
        if payload.entity_type() != entity_type {
            return Err(EngineError::PayloadMismatch {
                expected: entity_type,
                found: payload.entity_type(),
            });
        }

        let op = Operation::new(kind, entity_type, entity_id, payload);
        let id = op.id.clone();
        let event = SyncEvent::for_operation(SyncEventKind::OperationQueued, &op);

        let queued = self.mutate(|state| {
            state.pending_operations.push(op);
            state.pending_operations.len()
        });
        debug!(operation_id = %id, %entity_type, ?kind, queued, "operation queued");

        self.emit(event);
        Ok(id)
    }

    /// Removes an operation from the queue.
    pub fn remove(&self, id: &str) -> EngineResult<Operation> {
        self.mutate(|state| {
            let idx = state
                .pending_operations
                .iter()
                .position(|op| op.id == id)?;
            Some(state.pending_operations.remove(idx))
        })
        .ok_or_else(|| EngineError::OperationNotFound(id.to_string()))
    }

    /// Returns a copy of a queued operation.
    pub fn find(&self, id: &str) -> Option<Operation> {
        self.with_state(|state| state.operation(id).cloned())
    }

    /// Number of queued operations, whatever their status.
    pub fn count(&self) -> usize {
        self.with_state(|state| state.pending_operations.len())
    }

    /// Returns a copy of the queue in insertion order.
    pub fn pending_operations(&self) -> Vec<Operation> {
        self.with_state(|state| state.pending_operations.clone())
    }

    /// Returns copies of the operations that exhausted their retries.
    pub fn parked_operations(&self) -> Vec<Operation> {
        let max_attempts = self.config().retry.max_attempts;
        self.with_state(|state| {
            state
                .pending_operations
                .iter()
                .filter(|op| op.is_parked(max_attempts))
                .cloned()
                .collect()
        })
    }

    /// Drops queued operations and open conflicts and resets the counters.
    ///
    /// Operations currently being submitted are kept so their outcome can
    /// still be settled. Returns the number of operations dropped.
    pub fn clear_pending_operations(&self) -> usize {
        let (dropped, conflicts) = self.mutate(|state| {
            let before = state.pending_operations.len();
            state
                .pending_operations
                .retain(|op| op.status == OperationStatus::Syncing);
            let conflicts = state.conflicts.len();
            state.conflicts.clear();
            state.stats = SyncStats::default();
            (before - state.pending_operations.len(), conflicts)
        });

        info!(dropped, conflicts, "cleared pending operations");
        self.emit(SyncEvent::new(SyncEventKind::QueueCleared));
        dropped
    }

    /// Returns every parked operation to pending with a fresh retry budget.
    ///
    /// Returns the number of operations released.
    pub fn retry_parked(&self) -> usize {
        let max_attempts = self.config().retry.max_attempts;
        let released = self.mutate(|state| {
            let mut released = 0;
            for op in &mut state.pending_operations {
                if op.is_parked(max_attempts) {
                    op.retry_count = 0;
                    op.status = OperationStatus::Pending;
                    released += 1;
                }
            }
            released
        });

        if released > 0 {
            info!(released, "parked operations released for retry");
            self.spawn_sync();
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use crate::bus::{BusEvent, Topic};
    use crate::config::EngineConfig;
    use crate::engine::SyncEngine;
    use crate::error::EngineError;
    use crate::handler::{HandlerRegistry, MockHandler};
    use crate::store::MemoryStateStore;
    use flowsync_protocol::{
        EntityPayload, EntityType, HabitEntryRecord, OperationKind, OperationStatus, TaskRecord,
        TimeBlockRecord,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn offline_engine() -> Arc<SyncEngine> {
        let handlers = HandlerRegistry::new()
            .register(EntityType::Task, Arc::new(MockHandler::new()))
            .register(EntityType::TimeBlock, Arc::new(MockHandler::new()));
        SyncEngine::new(
            EngineConfig::new("queue").with_initially_online(false),
            Arc::new(MemoryStateStore::new()),
            handlers,
        )
    }

    fn task(id: &str) -> EntityPayload {
        EntityPayload::Task(TaskRecord::with_id(id))
    }

    #[test]
    fn enqueue_appends_and_announces() {
        let engine = offline_engine();
        let queued = Arc::new(Mutex::new(Vec::new()));
        let queued_clone = Arc::clone(&queued);
        let _sub = engine.subscribe(
            Topic::OperationQueued,
            Arc::new(move |event: &BusEvent| {
                if let Some(event) = event.as_sync() {
                    queued_clone.lock().push(event.operation_id.clone());
                }
            }),
        );

        let a = engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        let b = engine
            .enqueue(OperationKind::Update, EntityType::Task, "t1", task("t1"))
            .unwrap();

        assert_eq!(engine.count(), 2);
        let ids: Vec<String> = engine.pending_operations().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![a.clone(), b.clone()]);
        assert_eq!(*queued.lock(), vec![Some(a), Some(b)]);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_enqueue_waits_for_spawn_sync() {
        let handler = Arc::new(MockHandler::new());
        let engine = SyncEngine::new(
            EngineConfig::new("queue"),
            Arc::new(MemoryStateStore::new()),
            HandlerRegistry::new().register(EntityType::Task, handler.clone()),
        );

        engine
            .enqueue_deferred(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handler.call_count(), 0);
        assert_eq!(engine.count(), 1);

        engine.spawn_sync();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handler.call_count(), 1);
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn enqueue_rejects_unregistered_entity() {
        let engine = offline_engine();
        let payload = EntityPayload::HabitEntry(HabitEntryRecord {
            id: "h1".into(),
            ..HabitEntryRecord::default()
        });

        let err = engine
            .enqueue(OperationKind::Create, EntityType::HabitEntry, "h1", payload)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnregisteredEntity(EntityType::HabitEntry)));
        assert_eq!(engine.count(), 0);
    }

    #[test]
    fn enqueue_rejects_mismatched_payload() {
        let engine = offline_engine();
        let payload = EntityPayload::TimeBlock(TimeBlockRecord::with_id("b1"));

        let err = engine
            .enqueue(OperationKind::Create, EntityType::Task, "b1", payload)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PayloadMismatch {
                expected: EntityType::Task,
                found: EntityType::TimeBlock
            }
        ));
    }

    #[test]
    fn remove_and_find() {
        let engine = offline_engine();
        let id = engine
            .enqueue(OperationKind::Delete, EntityType::Task, "t1", task("t1"))
            .unwrap();

        assert_eq!(engine.find(&id).map(|op| op.kind), Some(OperationKind::Delete));
        assert_eq!(engine.remove(&id).unwrap().id, id);
        assert!(engine.find(&id).is_none());
        assert!(matches!(engine.remove(&id), Err(EngineError::OperationNotFound(_))));
    }

    #[test]
    fn clear_keeps_in_flight_operations() {
        let engine = offline_engine();
        let in_flight = engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        engine
            .enqueue(OperationKind::Create, EntityType::Task, "t2", task("t2"))
            .unwrap();
        engine.mutate(|state| {
            state.pending_operations[0].status = OperationStatus::Syncing;
            state.stats.success_count = 7;
        });

        assert_eq!(engine.clear_pending_operations(), 1);

        let state = engine.sync_state();
        assert_eq!(state.pending_operations.len(), 1);
        assert_eq!(state.pending_operations[0].id, in_flight);
        assert_eq!(state.stats.total(), 0);
    }

    #[test]
    fn retry_parked_resets_budget() {
        let engine = offline_engine();
        let id = engine
            .enqueue(OperationKind::Create, EntityType::Task, "t1", task("t1"))
            .unwrap();
        engine.mutate(|state| {
            let op = &mut state.pending_operations[0];
            op.status = OperationStatus::Failed;
            op.retry_count = 3;
        });
        assert_eq!(engine.parked_operations().len(), 1);

        assert_eq!(engine.retry_parked(), 1);

        let op = engine.find(&id).unwrap();
        assert!(op.is_pending());
        assert_eq!(op.retry_count, 0);
        assert_eq!(engine.retry_parked(), 0);
    }
}
