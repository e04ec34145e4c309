//! Error types for the document store.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Backup not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("Size mismatch after write: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("No user data directory available on this platform")]
    NoDataDir,

    #[error("Persistence blocked: {} could not be secured and will not be overwritten", .0.display())]
    PersistenceBlocked(PathBuf),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Store is shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
