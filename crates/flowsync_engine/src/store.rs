//! Snapshot persistence for the engine state.
//!
//! The engine persists its whole [`EngineState`] after every mutation. Stores
//! are opaque keyed blob stores; snapshots are encoded as CBOR.

use crate::error::{StoreError, StoreResult};
use flowsync_protocol::EngineState;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Name of the advisory lock file inside a state directory.
const LOCK_FILE: &str = "LOCK";

/// A keyed store for engine snapshots.
///
/// # Invariants
///
/// - `load` returns exactly the state last passed to `save` for that key
/// - `save` replaces the previous snapshot as a whole
/// - Stores must be `Send + Sync`; the engine calls them under its state lock
pub trait StateStore: Send + Sync {
    /// Loads the snapshot stored under `key`, if any.
    fn load(&self, key: &str) -> StoreResult<Option<EngineState>>;

    /// Replaces the snapshot stored under `key`.
    fn save(&self, key: &str, state: &EngineState) -> StoreResult<()>;

    /// Deletes the snapshot stored under `key`.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Encodes a snapshot to CBOR.
pub fn encode_snapshot(state: &EngineState) -> StoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(state, &mut bytes).map_err(|e| StoreError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a snapshot from CBOR.
pub fn decode_snapshot(bytes: &[u8]) -> StoreResult<EngineState> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

/// An in-memory state store.
///
/// Snapshots go through the same CBOR encoding as the file store. Saves can
/// be made to fail to exercise the engine's persistence-failure path.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Stores raw bytes under `key`, bypassing encoding.
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.write().insert(key.to_string(), bytes);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<EngineState>> {
        self.blobs
            .read()
            .get(key)
            .map(|bytes| decode_snapshot(bytes))
            .transpose()
    }

    fn save(&self, key: &str, state: &EngineState) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves disabled".into()));
        }
        let bytes = encode_snapshot(state)?;
        self.blobs.write().insert(key.to_string(), bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}

/// A file-based state store.
///
/// Each key maps to `<dir>/<key>.cbor`. Writes go to a temporary file that
/// is synced and renamed over the snapshot, so a crash leaves either the old
/// or the new snapshot, never a torn one.
///
/// The store holds an exclusive advisory lock on the directory for its whole
/// lifetime: exactly one engine may own a snapshot directory.
///
/// # Example
///
/// ```no_run
/// use flowsync_engine::{FileStateStore, StateStore};
/// use std::path::Path;
///
/// let store = FileStateStore::open(Path::new("state")).unwrap();
/// let restored = store.load("flowsync_engine_state").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    _lock_file: File,
}

impl FileStateStore {
    /// Opens (creating if needed) a state directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another store holds the directory.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the snapshot path for `key`.
    pub fn snapshot_path(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.cbor")))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<EngineState>> {
        let path = self.snapshot_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        decode_snapshot(&bytes).map(Some)
    }

    fn save(&self, key: &str, state: &EngineState) -> StoreResult<()> {
        let path = self.snapshot_path(key)?;
        let tmp_path = path.with_extension("cbor.tmp");
        let bytes = encode_snapshot(state)?;

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.snapshot_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileStateStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._lock_file);
    }
}
