//! Inspect command implementation.

use flowsync_engine::{FileStateStore, RetryConfig, StateStore};
use flowsync_protocol::{EngineState, OperationStatus, SyncStats};
use serde::Serialize;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// State directory.
    pub path: String,
    /// Snapshot key.
    pub key: String,
    /// Connectivity when the snapshot was written.
    pub is_online: bool,
    /// End time of the last completed pass, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    /// Operations waiting for a pass.
    pub pending: usize,
    /// Operations caught mid-submission.
    pub syncing: usize,
    /// Operations waiting out a backoff delay.
    pub retrying: usize,
    /// Operations that exhausted their retries.
    pub parked: usize,
    /// Open conflicts.
    pub conflict_count: usize,
    /// Outcome counters.
    pub stats: SyncStats,
    /// Queued operations (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<OperationRow>>,
    /// Open conflicts (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<ConflictRow>>,
}

/// One queued operation.
#[derive(Debug, Serialize)]
pub struct OperationRow {
    /// Operation ID.
    pub id: String,
    /// Mutation kind.
    pub kind: String,
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Lifecycle status.
    pub status: String,
    /// Failed submissions so far.
    pub retry_count: u32,
}

/// One open conflict.
#[derive(Debug, Serialize)]
pub struct ConflictRow {
    /// Conflict ID.
    pub id: String,
    /// Entity type.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// Detection time, RFC 3339.
    pub detected_at: String,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    key: &str,
    show_operations: bool,
    show_conflicts: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStateStore::open(path)?;
    let state = store
        .load(key)?
        .ok_or_else(|| format!("No snapshot '{}' found at {:?}", key, path))?;

    let mut result = summarize(&state, RetryConfig::default().max_attempts);
    result.path = path.display().to_string();
    result.key = key.to_string();
    if !show_operations {
        result.operations = None;
    }
    if !show_conflicts {
        result.conflicts = None;
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Builds the full inspection result for a snapshot.
pub fn summarize(state: &EngineState, max_attempts: u32) -> InspectResult {
    let mut result = InspectResult {
        path: String::new(),
        key: String::new(),
        is_online: state.is_online,
        last_sync_time: state.last_sync_time.map(|t| t.to_rfc3339()),
        pending: 0,
        syncing: 0,
        retrying: 0,
        parked: 0,
        conflict_count: state.conflicts.len(),
        stats: state.stats,
        operations: None,
        conflicts: None,
    };

    for op in &state.pending_operations {
        match op.status {
            OperationStatus::Pending => result.pending += 1,
            OperationStatus::Syncing => result.syncing += 1,
            OperationStatus::Failed if op.is_parked(max_attempts) => result.parked += 1,
            OperationStatus::Failed => result.retrying += 1,
            OperationStatus::Synced => {}
        }
    }

    result.operations = Some(
        state
            .pending_operations
            .iter()
            .map(|op| OperationRow {
                id: op.id.clone(),
                kind: format!("{:?}", op.kind),
                entity_type: op.entity_type.to_string(),
                entity_id: op.entity_id.clone(),
                status: format!("{:?}", op.status),
                retry_count: op.retry_count,
            })
            .collect(),
    );
    result.conflicts = Some(
        state
            .conflicts
            .iter()
            .map(|c| ConflictRow {
                id: c.id.clone(),
                entity_type: c.operation.entity_type.to_string(),
                entity_id: c.operation.entity_id.clone(),
                detected_at: c.detected_at.to_rfc3339(),
            })
            .collect(),
    );

    result
}

fn print_text_output(result: &InspectResult) {
    println!("FlowSync Snapshot: {} ({})", result.path, result.key);
    println!("=====================================");
    println!();
    println!("Engine:");
    println!("  Online:     {}", result.is_online);
    println!(
        "  Last sync:  {}",
        result.last_sync_time.as_deref().unwrap_or("never")
    );
    println!();
    println!("Queue:");
    println!("  Pending:    {}", result.pending);
    println!("  Syncing:    {}", result.syncing);
    println!("  Retrying:   {}", result.retrying);
    println!("  Parked:     {}", result.parked);
    println!("  Conflicts:  {}", result.conflict_count);
    println!();
    println!("Stats:");
    println!("  Synced:     {}", result.stats.success_count);
    println!("  Failed:     {}", result.stats.failure_count);
    println!("  Conflicted: {}", result.stats.conflict_count);

    if let Some(ref operations) = result.operations {
        println!();
        println!("Operations:");
        for op in operations {
            println!(
                "  {} {:<6} {}/{} [{}] retries={}",
                op.id, op.kind, op.entity_type, op.entity_id, op.status, op.retry_count
            );
        }
    }

    if let Some(ref conflicts) = result.conflicts {
        println!();
        println!("Conflicts:");
        for c in conflicts {
            println!(
                "  {} {}/{} detected {}",
                c.id, c.entity_type, c.entity_id, c.detected_at
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsync_protocol::{
        Conflict, EntityPayload, EntityType, Operation, OperationKind, TaskRecord,
    };

    fn op(status: OperationStatus, retry_count: u32) -> Operation {
        let mut op = Operation::new(
            OperationKind::Update,
            EntityType::Task,
            "t1",
            EntityPayload::Task(TaskRecord::with_id("t1")),
        );
        op.status = status;
        op.retry_count = retry_count;
        op
    }

    #[test]
    fn counts_by_status() {
        let mut state = EngineState {
            pending_operations: vec![
                op(OperationStatus::Pending, 0),
                op(OperationStatus::Syncing, 0),
                op(OperationStatus::Failed, 1),
                op(OperationStatus::Failed, 3),
            ],
            ..EngineState::default()
        };
        let detached = op(OperationStatus::Failed, 0);
        let payload = detached.payload.clone();
        state.conflicts.push(Conflict::new(detached, payload.clone(), payload));

        let result = summarize(&state, 3);
        assert_eq!(
            (result.pending, result.syncing, result.retrying, result.parked),
            (1, 1, 1, 1)
        );
        assert_eq!(result.conflict_count, 1);
        assert_eq!(result.operations.map(|o| o.len()), Some(4));
        assert_eq!(result.last_sync_time, None);
    }

    #[test]
    fn json_output_omits_unrequested_lists() {
        let mut result = summarize(&EngineState::default(), 3);
        result.operations = None;
        result.conflicts = None;

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("operations").is_none());
        assert_eq!(json["stats"]["successCount"], 0);
    }
}
