//! # FlowSync Engine
//!
//! Offline-first synchronization engine for FlowSync.
//!
//! This crate provides:
//! - Operation queue persisted as one snapshot per engine
//! - Sync executor with single-flight passes and exponential backoff
//! - Conflict store with local / remote / merge resolution
//! - Topic-based event bus with listener isolation
//! - Connectivity tracking and periodic scheduling
//!
//! ## Architecture
//!
//! Mutations are queued locally first and transmitted later:
//! 1. `enqueue` appends a pending operation and persists the snapshot
//! 2. A pass submits pending operations to their entity handlers, one at a time
//! 3. Accepted operations leave the queue; failures back off and retry;
//!    conflicts move to the conflict store until resolved
//!
//! ## Key Invariants
//!
//! - An operation is in the queue XOR inside exactly one open conflict
//! - At most one pass runs at a time
//! - No submission is attempted while offline
//! - Every state mutation is persisted before its event is emitted
//! - A failing listener never affects the emitter or other listeners

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bus;
mod config;
mod conflicts;
mod engine;
mod error;
mod handler;
mod network;
mod queue;
mod store;

pub use bus::{BusEvent, EventBus, Listener, Subscription, Topic};
pub use config::{EngineConfig, RetryConfig, DEFAULT_STORAGE_KEY};
pub use engine::{PassOutcome, SyncEngine};
pub use error::{EngineError, EngineResult, HandlerError, StoreError, StoreResult};
pub use handler::{EntityHandler, HandlerRegistry, MockHandler, SubmitOutcome};
pub use network::{BackgroundTasks, ConnectivityProbe, StaticProbe};
pub use store::{decode_snapshot, encode_snapshot, FileStateStore, MemoryStateStore, StateStore};
