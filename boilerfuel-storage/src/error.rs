//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur reading or writing local storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage file is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}
