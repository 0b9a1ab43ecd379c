//! Pairing credential and sync marker persistence.
//!
//! Keeps the `{token, secret}` pair under the same local keys the web client
//! uses, so a native host and the browser can share one pairing.

use crate::error::SyncResult;
use crate::keys::{SYNC_LAST_PULL_KEY, SYNC_LAST_PUSH_KEY, SYNC_SECRET_KEY, SYNC_TOKEN_KEY};
use crate::types::Credentials;
use boilerfuel_storage::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads and writes pairing state through the injected store.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the stored pair, or `None` unless both halves are present and
    /// non-empty.
    pub fn get(&self) -> SyncResult<Option<Credentials>> {
        let token = self.non_empty(SYNC_TOKEN_KEY)?;
        let secret = self.non_empty(SYNC_SECRET_KEY)?;
        Ok(token
            .zip(secret)
            .map(|(token, secret)| Credentials { token, secret }))
    }

    pub fn set(&self, credentials: &Credentials) -> SyncResult<()> {
        self.store.set(SYNC_TOKEN_KEY, &credentials.token)?;
        self.store.set(SYNC_SECRET_KEY, &credentials.secret)?;
        debug!("stored sync credentials for token {}", credentials.token);
        Ok(())
    }

    /// Removes token, secret and both markers. Logged data is untouched.
    pub fn clear(&self) -> SyncResult<()> {
        self.store.remove(SYNC_TOKEN_KEY)?;
        self.store.remove(SYNC_SECRET_KEY)?;
        self.store.remove(SYNC_LAST_PULL_KEY)?;
        self.store.remove(SYNC_LAST_PUSH_KEY)?;
        debug!("cleared sync credentials");
        Ok(())
    }

    pub fn is_paired(&self) -> SyncResult<bool> {
        Ok(self.get()?.is_some())
    }

    /// The pairing token alone, for display.
    pub fn token(&self) -> SyncResult<Option<String>> {
        self.non_empty(SYNC_TOKEN_KEY)
    }

    /// `updated_at` of the last envelope merged from the relay.
    pub fn last_pull(&self) -> SyncResult<Option<i64>> {
        self.marker(SYNC_LAST_PULL_KEY)
    }

    pub fn set_last_pull(&self, updated_at: i64) -> SyncResult<()> {
        self.store
            .set(SYNC_LAST_PULL_KEY, &updated_at.to_string())?;
        Ok(())
    }

    /// `updated_at` of this device's last successful upload. An envelope
    /// carrying exactly this value is our own.
    pub fn last_push(&self) -> SyncResult<Option<i64>> {
        self.marker(SYNC_LAST_PUSH_KEY)
    }

    pub fn set_last_push(&self, updated_at: i64) -> SyncResult<()> {
        self.store
            .set(SYNC_LAST_PUSH_KEY, &updated_at.to_string())?;
        Ok(())
    }

    fn marker(&self, key: &str) -> SyncResult<Option<i64>> {
        let Some(raw) = self.non_empty(key)? else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!("ignoring unreadable {key} marker {raw:?}: {e}");
                Ok(None)
            }
        }
    }

    fn non_empty(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.store.get(key)?.filter(|v| !v.is_empty()))
    }
}
