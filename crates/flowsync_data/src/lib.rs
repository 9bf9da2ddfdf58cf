//! # FlowSync Data
//!
//! Entity-level operations and cross-module cascades on top of the FlowSync
//! sync engine.
//!
//! This crate provides:
//! - [`UnifiedDataLayer`]: create, update, delete and link productivity
//!   entities, queueing each change on the engine
//! - The cascade-rule table deciding which modules hear about a change
//! - A local cache holding the latest version of every written entity
//!
//! ## Broadcast order
//!
//! A write broadcasts its primary update first, then each derived cascade in
//! table order. Every cascade is one hop further from the write that caused
//! it and never routes back to its source module. When the engine reports an
//! operation as synced, the owning module receives a non-propagating update
//! from [`Module::Sync`](flowsync_protocol::Module::Sync).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
pub mod cascade;
mod error;
mod layer;

pub use cache::EntityCache;
pub use cascade::Cascade;
pub use error::{DataError, DataResult};
pub use layer::UnifiedDataLayer;
