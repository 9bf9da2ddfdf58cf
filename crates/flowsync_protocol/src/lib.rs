//! # FlowSync Protocol
//!
//! Data model for the FlowSync offline-first sync engine.
//!
//! This crate provides:
//! - Typed entity payloads (`EntityPayload`) keyed by `EntityType`
//! - `Operation` for queued mutations
//! - `Conflict` for detected local/remote divergences
//! - `CrossModuleUpdate` for cascade notifications between app modules
//! - `SyncEvent` for low-level engine notifications
//! - `EngineState`, the single persisted aggregate
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod event;
mod module;
mod operation;
mod state;
mod update;

pub use conflict::{Conflict, ConflictResolution};
pub use entity::{
    EntityPayload, EntityType, HabitEntryRecord, PomodoroSessionRecord, TaskRecord,
    TimeBlockRecord,
};
pub use event::{PassReport, SyncEvent, SyncEventKind};
pub use module::{Module, Targets};
pub use operation::{Operation, OperationKind, OperationStatus};
pub use state::{EngineState, SyncStats};
pub use update::{CascadeAction, CrossModuleUpdate, UpdateData, UpdateType, MAX_CASCADE_HOPS};

/// Generates a fresh random identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
