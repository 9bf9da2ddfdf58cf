//! Error types for the sync engine.

use flowsync_protocol::EntityType;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the engine's public operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No handler is registered for the entity type.
    #[error("no handler registered for entity type {0}")]
    UnregisteredEntity(EntityType),

    /// Handlers required by a component are missing.
    #[error("missing handlers for entity types: {0:?}")]
    MissingHandlers(Vec<EntityType>),

    /// The payload variant does not match the operation's entity type.
    #[error("payload mismatch: expected {expected}, found {found}")]
    PayloadMismatch {
        /// Entity type of the operation.
        expected: EntityType,
        /// Entity type of the supplied payload.
        found: EntityType,
    },

    /// No open conflict with this ID.
    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    /// No queued operation with this ID.
    #[error("operation not found: {0}")]
    OperationNotFound(String),

    /// The call needs a tokio runtime and none is running.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// State store failure.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by entity handlers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the submission can be retried.
        retryable: bool,
    },

    /// The backend rejected the operation.
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The backend answered with something the handler could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timeout.
    #[error("submission timed out")]
    Timeout,
}

impl HandlerError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            HandlerError::Transport { retryable, .. } => *retryable,
            HandlerError::Timeout => true,
            HandlerError::Protocol(_) => true,
            HandlerError::Rejected(_) => false,
        }
    }
}

/// Errors raised by state stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The stored snapshot could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Another process owns the snapshot directory.
    #[error("state directory is locked by another process: {0}")]
    Locked(PathBuf),

    /// The storage key cannot be used as a file name.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// The store refused the write (used by test stores).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
