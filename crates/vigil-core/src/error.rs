//! Error types for Vigil

use thiserror::Error;

/// Top-level error type for the core crate
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Crash log error: {0}")]
    CrashLog(#[from] CrashLogError),
}

/// Errors related to context values (user info, network info)
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Empty context payload")]
    Empty,
}

/// Errors related to the crash marker left by the native handler
#[derive(Debug, Error)]
pub enum CrashLogError {
    #[error("Malformed crash log: {0}")]
    Malformed(String),

    #[error("Crash log is missing field: {0}")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            ContextError::Deserialization(err.to_string())
        } else {
            ContextError::Serialization(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CrashLogError {
    fn from(err: serde_json::Error) -> Self {
        CrashLogError::Malformed(err.to_string())
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;
