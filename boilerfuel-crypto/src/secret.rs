//! Pairing secret generation.

use rand::Rng;

/// Characters a pairing secret is drawn from. Excludes look-alikes
/// (`I`, `O`, `l`, `o`, `0`, `1`) so the code can be typed by hand.
pub const SECRET_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

/// Number of characters in a generated secret.
pub const SECRET_LENGTH: usize = 16;

/// Generates a new pairing secret from the thread-local CSPRNG.
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LENGTH)
        .map(|_| SECRET_ALPHABET[rng.random_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}
