//! Deterministic key derivation from the pairing secret.

use crate::error::{CryptoError, CryptoResult};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Application salt. Fixed so that every paired device derives the same key.
pub const KDF_SALT: &[u8] = b"boilerfuel-sync";

/// PBKDF2 round count.
pub const KDF_ITERATIONS: u32 = 100_000;

/// A 256-bit symmetric key derived from a pairing secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for DerivedKey {}

/// Derives the envelope key from a pairing secret.
///
/// PBKDF2-HMAC-SHA256 over [`KDF_SALT`] with [`KDF_ITERATIONS`] rounds. This is
/// CPU-heavy by construction; async callers should run it on a blocking thread.
pub fn derive_key(secret: &str) -> CryptoResult<DerivedKey> {
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "secret must not be empty".to_string(),
        ));
    }

    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut bytes);
    let key = DerivedKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}
