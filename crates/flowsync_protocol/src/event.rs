//! Low-level engine events.

use crate::entity::EntityType;
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// Connectivity changed.
    Connection,
    /// An operation was added to the queue.
    OperationQueued,
    /// A sync pass started.
    SyncStarted,
    /// A sync pass finished.
    SyncCompleted,
    /// The backend accepted an operation.
    OperationSynced,
    /// An operation exhausted its retries and was parked.
    OperationFailed,
    /// The backend reported a conflict for an operation.
    ConflictDetected,
    /// A conflict was resolved and its operation requeued.
    ConflictResolved,
    /// Queue, conflicts and stats were cleared.
    QueueCleared,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Operations submitted to a handler.
    pub attempted: u32,
    /// Operations accepted by the backend.
    pub synced: u32,
    /// Operations moved to the conflict store.
    pub conflicted: u32,
    /// Failed submissions scheduled for retry.
    pub retried: u32,
    /// Operations parked after exhausting their retries.
    pub parked: u32,
}

/// An event emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    /// Entity type, for operation-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityType>,
    /// Entity ID, for operation-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Operation ID, for operation-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Conflict ID, for conflict events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
    /// New connectivity, for connection events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    /// Pass summary, for `SyncCompleted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<PassReport>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl SyncEvent {
    /// Creates a bare event of the given kind.
    pub fn new(kind: SyncEventKind) -> Self {
        Self {
            kind,
            entity: None,
            entity_id: None,
            operation_id: None,
            conflict_id: None,
            online: None,
            report: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event about an operation.
    pub fn for_operation(kind: SyncEventKind, operation: &Operation) -> Self {
        Self {
            entity: Some(operation.entity_type),
            entity_id: Some(operation.entity_id.clone()),
            operation_id: Some(operation.id.clone()),
            ..Self::new(kind)
        }
    }

    /// Creates a connectivity event.
    pub fn connection(online: bool) -> Self {
        Self {
            online: Some(online),
            ..Self::new(SyncEventKind::Connection)
        }
    }

    /// Creates a pass-completed event.
    pub fn completed(report: PassReport) -> Self {
        Self {
            report: Some(report),
            ..Self::new(SyncEventKind::SyncCompleted)
        }
    }

    /// Attaches a conflict ID.
    pub fn with_conflict(mut self, conflict_id: impl Into<String>) -> Self {
        self.conflict_id = Some(conflict_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityPayload, TaskRecord};
    use crate::operation::OperationKind;

    #[test]
    fn operation_event_carries_ids() {
        let op = Operation::new(
            OperationKind::Create,
            EntityType::Task,
            "t1",
            EntityPayload::Task(TaskRecord::with_id("t1")),
        );
        let event = SyncEvent::for_operation(SyncEventKind::OperationSynced, &op)
            .with_conflict("c1");

        assert_eq!(event.entity, Some(EntityType::Task));
        assert_eq!(event.entity_id.as_deref(), Some("t1"));
        assert_eq!(event.operation_id.as_deref(), Some(op.id.as_str()));
        assert_eq!(event.conflict_id.as_deref(), Some("c1"));
    }

    #[test]
    fn event_wire_format() {
        let json = serde_json::to_value(SyncEvent::connection(true)).unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["online"], true);
        assert!(json.get("entityId").is_none());
    }
}
