//! Conflict records and resolution choices.

use crate::entity::EntityPayload;
use crate::operation::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A divergence between a queued operation and the backend's state.
///
/// The conflict owns the operation it was raised for: while a conflict is
/// open, its operation is not in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Conflict ID.
    pub id: String,
    /// The detached operation.
    pub operation: Operation,
    /// What the client tried to write.
    pub local_payload: EntityPayload,
    /// What the backend currently holds.
    pub remote_data: EntityPayload,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Creates a new conflict for `operation`.
    pub fn new(operation: Operation, local_payload: EntityPayload, remote_data: EntityPayload) -> Self {
        Self {
            id: crate::new_id(),
            operation,
            local_payload,
            remote_data,
            detected_at: Utc::now(),
        }
    }

    /// Returns the ID of the operation this conflict was raised for.
    pub fn operation_id(&self) -> &str {
        &self.operation.id
    }

    /// Default merge: local fields overwrite remote fields.
    ///
    /// Falls back to the local payload if the remote side is of another type.
    pub fn shallow_merge(&self) -> EntityPayload {
        self.local_payload
            .merged_over(&self.remote_data)
            .unwrap_or_else(|| self.local_payload.clone())
    }
}

/// How a conflict should be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local version.
    Local,
    /// Accept the remote version.
    Remote,
    /// Merge both; an explicit payload wins over the default merge policy.
    Merge(Option<EntityPayload>),
}
