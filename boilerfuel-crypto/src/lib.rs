//! Encryption layer for BoilerFuel device sync.
//!
//! Every synchronized snapshot travels through the relay as a single opaque
//! string produced here:
//! - PBKDF2-HMAC-SHA256 (fixed application salt, 100,000 rounds) derives a
//!   256-bit key from the shared pairing secret
//! - AES-256-GCM seals the JSON serialization under a fresh 96-bit nonce
//! - `base64(nonce || ciphertext || tag)` is what the relay stores
//!
//! The format matches the web client's Web Crypto implementation, so native
//! and browser devices can share one pairing.
//!
//! # Key handling
//!
//! The key is never stored or transmitted. Both devices derive the same key
//! from the same secret, which is why the salt is fixed rather than random.
//! Derived keys are zeroized on drop.

mod cipher;
mod error;
mod key;
mod secret;

pub use cipher::{NONCE_SIZE, TAG_SIZE, decrypt, decrypt_with_key, encrypt, encrypt_with_key};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, KDF_ITERATIONS, KDF_SALT, KEY_SIZE, derive_key};
pub use secret::{SECRET_ALPHABET, SECRET_LENGTH, generate_secret};
