//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening the backend failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A statement or lookup failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller supplied an unusable key, tenant or value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
