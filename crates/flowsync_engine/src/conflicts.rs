//! Conflict store operations on the engine.
//!
//! A conflicted operation leaves the queue and lives inside its [`Conflict`]
//! until resolved. Resolution puts it back in the queue as a fresh pending
//! operation carrying the resolved payload.

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use flowsync_protocol::{Conflict, ConflictResolution, EntityPayload, SyncEvent, SyncEventKind};
use tracing::info;

impl SyncEngine {
    /// Returns copies of the open conflicts.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.with_state(|state| state.conflicts.clone())
    }

    /// Returns a copy of an open conflict.
    pub fn conflict(&self, conflict_id: &str) -> Option<Conflict> {
        self.with_state(|state| state.conflict(conflict_id).cloned())
    }

    /// Resolves a conflict and requeues its operation. Returns the
    /// operation ID.
    ///
    /// `Merge(None)` asks the entity's handler to merge the two sides; the
    /// default handler merge lets local fields overwrite remote fields.
    ///
    /// # Errors
    ///
    /// - `ConflictNotFound` if no open conflict has this ID
    /// - `PayloadMismatch` if the resolved payload is of another entity type
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> EngineResult<String> {
        let conflict = self
            .conflict(conflict_id)
            .ok_or_else(|| EngineError::ConflictNotFound(conflict_id.to_string()))?;

        let strategy = match &resolution {
            ConflictResolution::Local => "local",
            ConflictResolution::Remote => "remote",
            ConflictResolution::Merge(_) => "merge",
        };
        let resolved = self.resolved_payload(&conflict, resolution);

        let expected = conflict.operation.entity_type;
        if resolved.entity_type() != expected {
            return Err(EngineError::PayloadMismatch {
                expected,
                found: resolved.entity_type(),
            });
        }

        let requeued = self.mutate(|state| {
            let idx = state.conflicts.iter().position(|c| c.id == conflict_id)?;
            let mut op = state.conflicts.remove(idx).operation;
            op.requeue(resolved);

            let event = SyncEvent::for_operation(SyncEventKind::ConflictResolved, &op)
                .with_conflict(conflict_id);
            let id = op.id.clone();
            match state.pending_operations.iter_mut().find(|queued| queued.id == id) {
                Some(existing) => *existing = op,
                None => state.pending_operations.push(op),
            }
            Some((id, event))
        });

        // Resolved concurrently between the lookup and the mutation.
        let (operation_id, event) =
            requeued.ok_or_else(|| EngineError::ConflictNotFound(conflict_id.to_string()))?;

        info!(%conflict_id, %operation_id, strategy, "conflict resolved");
        self.emit(event);
        self.spawn_sync();
        Ok(operation_id)
    }

    fn resolved_payload(&self, conflict: &Conflict, resolution: ConflictResolution) -> EntityPayload {
        match resolution {
            ConflictResolution::Local => conflict.local_payload.clone(),
            ConflictResolution::Remote => conflict.remote_data.clone(),
            ConflictResolution::Merge(Some(payload)) => payload,
            ConflictResolution::Merge(None) => {
                match self.handlers().get(conflict.operation.entity_type) {
                    Some(handler) => handler.merge(&conflict.local_payload, &conflict.remote_data),
                    None => conflict.shallow_merge(),
                }
            }
        }
    }
}
