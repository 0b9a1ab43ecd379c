//! Local-first, end-to-end encrypted sync for BoilerFuel.
//!
//! Devices pair under a shared secret and exchange one encrypted snapshot
//! through a relay that only ever sees ciphertext:
//! - Pairing: create a token on one device, join it from another
//! - Push/pull: fetch the peer's envelope, merge field by field, upload
//! - Merge: per-field strategies that never drop logged meals
//! - Activity log: bounded history of sync attempts for the UI
//!
//! The engine is wire-compatible with the BoilerFuel web client: same relay
//! endpoint, same envelope format, same local storage keys.

pub mod activity_log;
pub mod api_client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod merge;
pub mod snapshot;
pub mod sync_engine;
pub mod types;

pub use activity_log::{ActivityEntry, SyncActivityLog, SyncDirection, SyncOutcome};
pub use config::SyncConfig;
pub use credentials::CredentialStore;
pub use error::{SyncError, SyncResult};
pub use merge::{MergeEngine, MergeReport, MergedSnapshot, merge_snapshots};
pub use snapshot::{DeviceDescriptor, HostDescriptor, SnapshotGatherer};
pub use sync_engine::{JoinReport, PushReport, SyncEngine, SyncStatus};
pub use types::*;
