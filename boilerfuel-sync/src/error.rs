//! Sync error types.

use boilerfuel_crypto::CryptoError;
use boilerfuel_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in pairing and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The envelope could not be opened: the secret is wrong or the data is
    /// corrupt. Never a connectivity problem.
    #[error("decryption failed (wrong sync code or corrupted data): {0}")]
    Decryption(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("relay returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("device is already paired")]
    AlreadyPaired,

    #[error("device is not paired")]
    NotPaired,

    #[error("a sync operation is already in progress")]
    SyncInProgress,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// True for a wrong secret or corrupt envelope.
    pub fn is_decryption(&self) -> bool {
        matches!(self, SyncError::Decryption(_))
    }

    /// True for transport failures and relay-side errors, i.e. the ones a
    /// retry later might fix.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Api { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption(msg) => SyncError::Decryption(msg),
            other => SyncError::Crypto(other),
        }
    }
}
