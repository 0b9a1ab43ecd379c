//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while sealing or opening a sync envelope.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong secret, tampered ciphertext, truncated or badly encoded envelope.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
