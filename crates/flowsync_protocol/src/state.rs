//! The persisted engine aggregate.

use crate::conflict::Conflict;
use crate::operation::{Operation, OperationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic sync counters.
///
/// Counters only grow during normal operation; they are reset together with
/// the queue by an explicit maintenance clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Operations accepted by the backend.
    pub success_count: u64,
    /// Operations parked after exhausting retries.
    pub failure_count: u64,
    /// Conflicts reported by the backend.
    pub conflict_count: u64,
}

impl SyncStats {
    /// Records an accepted operation.
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    /// Records a parked operation.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    /// Records a detected conflict.
    pub fn record_conflict(&mut self) {
        self.conflict_count += 1;
    }

    /// Total number of finished outcomes.
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count + self.conflict_count
    }
}

/// Full engine state, persisted as one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Current connectivity.
    pub is_online: bool,
    /// Whether a sync pass is running.
    pub is_syncing: bool,
    /// End time of the last completed pass.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Queued operations, in insertion order.
    pub pending_operations: Vec<Operation>,
    /// Open conflicts.
    pub conflicts: Vec<Conflict>,
    /// Outcome counters.
    pub stats: SyncStats,
}

impl EngineState {
    /// Prepares a restored snapshot for a fresh process.
    ///
    /// A pass cannot survive a restart: `is_syncing` is cleared and
    /// operations caught mid-submission go back to pending. Failed
    /// operations still inside their retry budget lost their backoff timer
    /// with the old process, so they go back to pending too. Parked
    /// operations stay parked.
    pub fn recover(&mut self, max_attempts: u32) -> usize {
        self.is_syncing = false;
        let mut recovered = 0;
        for op in &mut self.pending_operations {
            let waiting_retry =
                op.status == OperationStatus::Failed && op.retry_count < max_attempts;
            if op.status == OperationStatus::Syncing || waiting_retry {
                op.status = OperationStatus::Pending;
                recovered += 1;
            }
        }
        recovered
    }

    /// Finds a queued operation by ID.
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.pending_operations.iter().find(|op| op.id == id)
    }

    /// Finds an open conflict by ID.
    pub fn conflict(&self, id: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    /// Number of operations with the given status.
    pub fn count_with_status(&self, status: OperationStatus) -> usize {
        self.pending_operations
            .iter()
            .filter(|op| op.status == status)
            .count()
    }
}
