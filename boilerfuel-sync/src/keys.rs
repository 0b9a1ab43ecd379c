//! Local storage keys owned by the sync engine.
//!
//! The credential and marker keys match the web client so both can read the
//! same pairing.

pub const SYNC_TOKEN_KEY: &str = "boilerfuel_sync_token";
pub const SYNC_SECRET_KEY: &str = "boilerfuel_sync_secret";
pub const SYNC_LAST_PULL_KEY: &str = "boilerfuel_sync_last_pull";
pub const SYNC_LAST_PUSH_KEY: &str = "boilerfuel_sync_last_push";

pub const DEVICE_ID_KEY: &str = "boilerfuel_sync_device_id";
pub const DEVICE_REGISTRY_KEY: &str = "boilerfuel_sync_devices";

pub const MEALS_BACKUP_KEY: &str = "boilerfuel_meals_backup";
pub const ACTIVITY_LOG_KEY: &str = "boilerfuel_sync_activity";
