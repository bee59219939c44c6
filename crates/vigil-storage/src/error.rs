//! Error types for vigil-storage
//!
//! Internal operations return these errors; public entry points funnel them
//! into the internal logger and degrade to `bool`/`Option`/`()`.

use thiserror::Error;
use vigil_core::{ContextError, CrashLogError};

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested item was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed header or length; content past the last valid block is ignored
    #[error("Structural corruption: {0}")]
    StructuralCorruption(String),

    /// A block or item is larger than allowed
    #[error("Capacity exceeded: {size} bytes (max {max})")]
    CapacityExceeded { size: u64, max: u64 },

    /// A crash marker exists but no UI context can be attributed to it
    #[error("Recovery ambiguity: {0}")]
    RecoveryAmbiguity(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The persistence queue no longer accepts tasks
    #[error("Persistence queue is closed")]
    QueueClosed,

    /// No tokio runtime to host the persistence worker
    #[error("No async runtime available: {0}")]
    NoRuntime(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<ContextError> for StorageError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Serialization(msg) => StorageError::Serialization(msg),
            ContextError::Deserialization(msg) => StorageError::Deserialization(msg),
            ContextError::Empty => StorageError::Deserialization(err.to_string()),
        }
    }
}

impl From<CrashLogError> for StorageError {
    fn from(err: CrashLogError) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new StructuralCorruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::StructuralCorruption(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
