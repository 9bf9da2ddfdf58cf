//! CLI command implementations.

pub mod clear;
pub mod demo;
pub mod inspect;
pub mod retry;

use flowsync_engine::{
    EngineConfig, FileStateStore, HandlerRegistry, StateStore, SyncEngine,
};
use std::path::Path;
use std::sync::Arc;

/// Opens an offline engine over the snapshot at `path`/`key`.
///
/// No handlers are registered: the engine is only used to edit the queue,
/// never to submit.
pub fn open_offline(path: &Path, key: &str) -> Result<Arc<SyncEngine>, Box<dyn std::error::Error>> {
    let store = FileStateStore::open(path)?;
    if store.load(key)?.is_none() {
        return Err(format!("No snapshot '{}' found at {:?}", key, path).into());
    }
    Ok(SyncEngine::new(
        EngineConfig::new(key).with_initially_online(false),
        Arc::new(store),
        HandlerRegistry::new(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsync_protocol::{
        EngineState, EntityPayload, EntityType, Operation, OperationKind, OperationStatus,
        TaskRecord,
    };

    fn seed(dir: &Path, key: &str) {
        let mut parked = Operation::new(
            OperationKind::Create,
            EntityType::Task,
            "t1",
            EntityPayload::Task(TaskRecord::with_id("t1")),
        );
        parked.status = OperationStatus::Failed;
        parked.retry_count = 3;
        let state = EngineState {
            pending_operations: vec![parked],
            ..EngineState::default()
        };
        FileStateStore::open(dir).unwrap().save(key, &state).unwrap();
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_offline(dir.path(), "absent").unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn retry_releases_parked_operations() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "cli");

        retry::run(dir.path(), "cli").unwrap();

        let state = FileStateStore::open(dir.path())
            .unwrap()
            .load("cli")
            .unwrap()
            .unwrap();
        assert_eq!(state.pending_operations[0].status, OperationStatus::Pending);
        assert_eq!(state.pending_operations[0].retry_count, 0);
    }

    #[test]
    fn clear_respects_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "cli");

        clear::run(dir.path(), "cli", true).unwrap();
        let load = || {
            FileStateStore::open(dir.path())
                .unwrap()
                .load("cli")
                .unwrap()
                .unwrap()
        };
        assert_eq!(load().pending_operations.len(), 1);

        clear::run(dir.path(), "cli", false).unwrap();
        assert!(load().pending_operations.is_empty());
    }
}
