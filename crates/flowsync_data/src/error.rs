//! Error types for the data layer.

use flowsync_engine::EngineError;
use flowsync_protocol::EntityType;
use thiserror::Error;

/// Result type for data layer operations.
pub type DataResult<T> = Result<T, DataError>;

/// Errors raised by the unified data layer.
#[derive(Error, Debug)]
pub enum DataError {
    /// The entity is not in the local cache.
    #[error("{entity_type} not found: {id}")]
    NotFound {
        /// Entity type.
        entity_type: EntityType,
        /// Entity ID.
        id: String,
    },

    /// The engine refused the operation.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl DataError {
    pub(crate) fn not_found(entity_type: EntityType, id: &str) -> Self {
        DataError::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }
}
