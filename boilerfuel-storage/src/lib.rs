//! Local key-value storage for BoilerFuel.
//!
//! The application keeps every logged value (meals, water, weight,
//! preferences) as a JSON string under a fixed key, the same model the web
//! client uses with `localStorage`. The sync engine reads and writes through
//! the [`KeyValueStore`] trait so hosts can plug in their own backend.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local map, for tests and embedding
//! - [`FileStore`]: a single JSON file, rewritten atomically on every change
//!
//! Failures are returned, never swallowed: callers decide whether a failed
//! read is fatal.

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// String key-value storage shared between the sync engine and the rest of
/// the application.
///
/// Implementations must return the most recently written value: the merge
/// engine relies on reading fresh data, not a snapshot taken earlier.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value under `key`, or `None` if absent.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}
