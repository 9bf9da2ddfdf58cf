//! Queued mutation records.

use crate::entity::{EntityPayload, EntityType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Entity was created.
    Create,
    /// Entity was modified.
    Update,
    /// Entity was deleted.
    Delete,
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next sync pass.
    Pending,
    /// Currently being submitted to its handler.
    Syncing,
    /// Accepted by the backend.
    Synced,
    /// Submission failed; either waiting out a backoff delay or parked.
    Failed,
}

/// A mutation waiting to be transmitted to the backend.
///
/// # Fields
///
/// - `id`: Unique operation identifier
/// - `kind`: Create, Update or Delete
/// - `entity_type` / `entity_id`: The entity being modified
/// - `payload`: The entity record (or patch) to submit
/// - `retry_count`: Number of failed submissions so far
/// - `status`: Where the operation is in its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique operation ID.
    pub id: String,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity ID.
    pub entity_id: String,
    /// Entity payload.
    pub payload: EntityPayload,
    /// When the mutation was requested.
    pub created_at: DateTime<Utc>,
    /// Number of failed submissions.
    pub retry_count: u32,
    /// Lifecycle status.
    pub status: OperationStatus,
}

impl Operation {
    /// Creates a new pending operation with a fresh ID.
    pub fn new(
        kind: OperationKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: EntityPayload,
    ) -> Self {
        Self {
            id: crate::new_id(),
            kind,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            status: OperationStatus::Pending,
        }
    }

    /// Returns true if the operation is waiting for a sync pass.
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }

    /// Returns true if the operation exhausted `max_attempts` and needs manual attention.
    pub fn is_parked(&self, max_attempts: u32) -> bool {
        self.status == OperationStatus::Failed && self.retry_count >= max_attempts
    }

    /// Resets the operation to a fresh pending state with the given payload.
    pub fn requeue(&mut self, payload: EntityPayload) {
        self.payload = payload;
        self.retry_count = 0;
        self.status = OperationStatus::Pending;
    }
}
