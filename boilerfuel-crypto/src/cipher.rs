//! AES-256-GCM sealing of JSON snapshots into base64 envelopes.
//!
//! Wire format: `base64(nonce(12) || ciphertext || tag(16))`, standard
//! alphabet with padding.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, derive_key};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Serializes `value` to JSON and seals it under `key`.
///
/// A fresh random nonce is drawn from the OS RNG on every call.
pub fn encrypt_with_key<T: Serialize + ?Sized>(key: &DerivedKey, value: &T) -> CryptoResult<String> {
    let plaintext = serde_json::to_vec(value)?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|e| CryptoError::Encryption(format!("envelope seal failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(nonce.as_slice());
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(combined))
}

/// Opens an envelope sealed under `key` and deserializes the JSON inside.
pub fn decrypt_with_key<T: DeserializeOwned>(key: &DerivedKey, envelope: &str) -> CryptoResult<T> {
    let combined = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::Decryption(format!("invalid envelope encoding: {e}")))?;

    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption(format!(
            "envelope too short: {} bytes",
            combined.len()
        )));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| {
            CryptoError::Decryption("authentication failed (wrong secret or tampered data)".to_string())
        })?;

    Ok(serde_json::from_slice(&plaintext)?)
}

/// Derives the key from `secret` and seals `value`.
pub fn encrypt<T: Serialize + ?Sized>(value: &T, secret: &str) -> CryptoResult<String> {
    let key = derive_key(secret)?;
    encrypt_with_key(&key, value)
}

/// Derives the key from `secret` and opens `envelope`.
pub fn decrypt<T: DeserializeOwned>(envelope: &str, secret: &str) -> CryptoResult<T> {
    let key = derive_key(secret)?;
    decrypt_with_key(&key, envelope)
}
