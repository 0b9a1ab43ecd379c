//! Pairing and push/pull orchestration.
//!
//! The engine is client-driven: the host calls [`SyncEngine::push`] after
//! local edits and [`SyncEngine::pull`] on startup or focus. There are no
//! background timers. Every operation holds a non-reentrant in-flight flag, so
//! a second call while one is running fails with
//! [`SyncError::SyncInProgress`] instead of interleaving merges.
//!
//! Flow of a push:
//! 1. Fetch the envelope if it is newer than the last-pull marker
//! 2. Decrypt and merge it into local storage, advance the marker
//! 3. Re-gather the merged state, encrypt, upload, record the last-push marker
//!
//! An envelope whose `updated_at` equals the last-push marker is our own
//! upload. It is skipped rather than merged back over newer local edits.
//!
//! A network failure in steps 1-2 degrades to uploading local state. A
//! decryption failure aborts: the secret is wrong and uploading would replace
//! the peer's data with an envelope it cannot read.

use crate::activity_log::{ActivityEntry, SyncActivityLog, SyncDirection};
use crate::api_client::RelayClient;
use crate::config::SyncConfig;
use crate::credentials::CredentialStore;
use crate::error::{SyncError, SyncResult};
use crate::merge::{MergeEngine, MergeReport};
use crate::snapshot::{DeviceDescriptor, HostDescriptor, SnapshotGatherer};
use crate::types::*;

use boilerfuel_crypto::{DerivedKey, decrypt_with_key, derive_key, encrypt_with_key, generate_secret};
use boilerfuel_storage::KeyValueStore;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Outcome of [`SyncEngine::join_pair`].
#[derive(Debug)]
pub struct JoinReport {
    /// Fields the initial pull changed locally.
    pub merged_fields: Vec<SyncField>,
    /// Why publishing this device's state after joining failed, if it did.
    /// The device is paired either way.
    pub publish_error: Option<SyncError>,
}

/// Outcome of [`SyncEngine::push`].
#[derive(Debug)]
pub struct PushReport {
    pub merged_fields: Vec<SyncField>,
    pub restored_meal_entries: usize,
    /// Tolerated failure of the pull phase; local state was uploaded without
    /// merging the remote envelope first.
    pub pull_error: Option<SyncError>,
    /// `updated_at` sent with the upload.
    pub uploaded_at: i64,
}

/// Snapshot of engine state for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub token: Option<String>,
    pub device_id: String,
    pub last_pull: Option<i64>,
    pub last_activity: Option<ActivityEntry>,
}

/// Holds the in-flight flag until dropped.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs PBKDF2 off the async executor.
async fn derive(secret: &str) -> SyncResult<DerivedKey> {
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || derive_key(&secret))
        .await
        .map_err(|e| SyncError::Task(format!("key derivation task: {e}")))?
        .map_err(SyncError::from)
}

/// Local-first sync engine for one device.
pub struct SyncEngine {
    relay: RelayClient,
    store: Arc<dyn KeyValueStore>,
    credentials: CredentialStore,
    gatherer: SnapshotGatherer,
    merger: MergeEngine,
    activity: Mutex<SyncActivityLog>,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        descriptor: Arc<dyn DeviceDescriptor>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let relay = RelayClient::new(&config)?;
        let activity = SyncActivityLog::load(store.as_ref(), config.activity_log_capacity)?;

        Ok(Self {
            relay,
            credentials: CredentialStore::new(store.clone()),
            gatherer: SnapshotGatherer::new(store.clone(), descriptor),
            merger: MergeEngine::new(store.clone()),
            store,
            activity: Mutex::new(activity),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Engine labelling this device from the build target.
    pub fn with_host_descriptor(config: SyncConfig, store: Arc<dyn KeyValueStore>) -> SyncResult<Self> {
        Self::new(config, store, Arc::new(HostDescriptor))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    // ── Pairing ──

    /// Starts a new pair from this device and returns the code to show on
    /// the other one.
    pub async fn create_pair(&self) -> SyncResult<Credentials> {
        let _guard = self.begin()?;
        let result = self.create_pair_inner().await;
        self.finish(SyncDirection::Push, "create pair", result, |creds| {
            (Vec::new(), format!("created pair {}", creds.token))
        })
    }

    async fn create_pair_inner(&self) -> SyncResult<Credentials> {
        if self.credentials.is_paired()? {
            return Err(SyncError::AlreadyPaired);
        }

        let secret = generate_secret();
        let key = derive(&secret).await?;
        let snapshot = self.gatherer.gather()?;
        let encrypted = encrypt_with_key(&key, &snapshot)?;
        let token = self.relay.create(&encrypted, snapshot.timestamp).await?;

        let credentials = Credentials { token, secret };
        self.credentials.set(&credentials)?;
        self.credentials.set_last_push(snapshot.timestamp)?;
        Ok(credentials)
    }

    /// Joins the pair identified by `token` using the code from the other
    /// device, merges its data, then publishes the merged state.
    pub async fn join_pair(&self, token: &str, secret: &str) -> SyncResult<JoinReport> {
        let _guard = self.begin()?;
        let credentials = Credentials {
            token: token.trim().to_string(),
            secret: secret.trim().to_string(),
        };
        let result = self.join_pair_inner(&credentials).await;
        self.finish(SyncDirection::Pull, "join pair", result, |report| {
            let detail = match &report.publish_error {
                None => format!("joined pair {}", credentials.token),
                Some(e) => format!("joined pair {}, publish failed: {e}", credentials.token),
            };
            (report.merged_fields.clone(), detail)
        })
    }

    async fn join_pair_inner(&self, credentials: &Credentials) -> SyncResult<JoinReport> {
        if self.credentials.is_paired()? {
            return Err(SyncError::AlreadyPaired);
        }

        let pre_merge = self.merger.read_local()?;
        let envelope = self.relay.fetch(&credentials.token, None).await?;
        let key = derive(&credentials.secret).await?;

        let merged_fields = if envelope.payload().is_some() {
            self.merge_remote(&key, &envelope, &pre_merge)?.changed_fields
        } else {
            debug!("pair {} has no envelope yet", credentials.token);
            Vec::new()
        };

        self.credentials.set(credentials)?;
        if let Some(updated_at) = envelope.updated_at {
            self.credentials.set_last_pull(updated_at)?;
        }

        let publish_error = match self.push_inner(credentials, &key).await {
            Ok(_) => None,
            Err(e) => {
                warn!("joined pair but publishing local state failed: {e}");
                Some(e)
            }
        };

        Ok(JoinReport {
            merged_fields,
            publish_error,
        })
    }

    /// Forgets the pairing. The relay copy is deleted best-effort; local
    /// credentials are cleared even if the relay is unreachable. Logged data
    /// stays.
    pub async fn unpair(&self) -> SyncResult<()> {
        let _guard = self.begin()?;
        let result = self.unpair_inner().await;
        self.finish(SyncDirection::Push, "unpair", result, |_| {
            (Vec::new(), "unpaired".to_string())
        })
    }

    async fn unpair_inner(&self) -> SyncResult<()> {
        if let Some(token) = self.credentials.token()? {
            if let Err(e) = self.relay.delete(&token).await {
                warn!("could not delete pair {token} on relay, unpairing locally: {e}");
            }
        }
        self.credentials.clear()
    }

    // ── Sync ──

    /// Pulls and merges remote changes, then uploads the merged local state.
    pub async fn push(&self) -> SyncResult<PushReport> {
        let _guard = self.begin()?;
        let result = async {
            let credentials = self.require_credentials()?;
            let key = derive(&credentials.secret).await?;
            self.push_inner(&credentials, &key).await
        }
        .await;

        self.finish(SyncDirection::Push, "push", result, |report| {
            let detail = match &report.pull_error {
                None => "uploaded".to_string(),
                Some(e) => format!("uploaded without pulling: {e}"),
            };
            (report.merged_fields.clone(), detail)
        })
    }

    async fn push_inner(&self, credentials: &Credentials, key: &DerivedKey) -> SyncResult<PushReport> {
        let pre_merge = self.merger.read_local()?;

        let mut merge = MergeReport::default();
        let mut pull_error = None;
        match self.fetch_changed(&credentials.token).await {
            Ok(Some(envelope)) => merge = self.merge_remote(key, &envelope, &pre_merge)?,
            Ok(None) => {}
            Err(e) if e.is_network() => {
                warn!("pull before push failed, uploading local state: {e}");
                pull_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        let snapshot = self.gatherer.gather()?;
        let encrypted = encrypt_with_key(key, &snapshot)?;
        self.relay
            .push(&credentials.token, &encrypted, snapshot.timestamp)
            .await?;
        self.credentials.set_last_push(snapshot.timestamp)?;

        Ok(PushReport {
            merged_fields: merge.changed_fields,
            restored_meal_entries: merge.restored_meal_entries,
            pull_error,
            uploaded_at: snapshot.timestamp,
        })
    }

    /// Pulls and merges remote changes without uploading. Returns true if any
    /// synchronized field changed locally.
    pub async fn pull(&self) -> SyncResult<bool> {
        let _guard = self.begin()?;
        let result = self.pull_inner().await;
        self.finish(SyncDirection::Pull, "pull", result, |report| match report {
            None => (Vec::new(), "up to date".to_string()),
            Some(r) if r.is_empty() => (Vec::new(), "no local changes".to_string()),
            Some(r) => (r.changed_fields.clone(), format!("merged {} fields", r.changed_fields.len())),
        })
        .map(|report| report.is_some_and(|r| !r.is_empty()))
    }

    async fn pull_inner(&self) -> SyncResult<Option<MergeReport>> {
        let credentials = self.require_credentials()?;
        let pre_merge = self.merger.read_local()?;

        let Some(envelope) = self.fetch_changed(&credentials.token).await? else {
            return Ok(None);
        };
        let key = derive(&credentials.secret).await?;
        self.merge_remote(&key, &envelope, &pre_merge).map(Some)
    }

    /// Restores meals to their value before the most recent merge. Returns
    /// false if there is no backup.
    pub async fn restore_meals_backup(&self) -> SyncResult<bool> {
        let _guard = self.begin()?;
        self.merger.restore_meals_backup()
    }

    // ── State ──

    pub fn state(&self) -> SyncResult<SyncState> {
        if self.in_flight.load(Ordering::Acquire) {
            return Ok(SyncState::Syncing);
        }
        Ok(if self.credentials.is_paired()? {
            SyncState::Idle
        } else {
            SyncState::Unpaired
        })
    }

    pub fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            state: self.state()?,
            token: self.credentials.token()?,
            device_id: self.gatherer.device_id()?,
            last_pull: self.credentials.last_pull()?,
            last_activity: self.lock_activity().latest().cloned(),
        })
    }

    /// Activity entries, oldest first.
    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.lock_activity().entries()
    }

    // ── Internals ──

    fn begin(&self) -> SyncResult<InFlightGuard<'_>> {
        InFlightGuard::acquire(&self.in_flight).inspect_err(|_| {
            debug!("rejecting sync call, another one is in flight");
        })
    }

    fn require_credentials(&self) -> SyncResult<Credentials> {
        self.credentials.get()?.ok_or(SyncError::NotPaired)
    }

    /// The remote envelope if the relay has one newer than our marker that
    /// another device uploaded.
    async fn fetch_changed(&self, token: &str) -> SyncResult<Option<RemoteEnvelope>> {
        let since = self.credentials.last_pull()?;
        let envelope = self.relay.fetch(token, since).await?;
        if !envelope.changed || envelope.payload().is_none() {
            info!("up to date");
            return Ok(None);
        }
        if let Some(updated_at) = envelope.updated_at {
            if self.credentials.last_push()? == Some(updated_at) {
                debug!("relay holds our own upload from {updated_at}, skipping merge");
                self.credentials.set_last_pull(updated_at)?;
                return Ok(None);
            }
        }
        Ok(Some(envelope))
    }

    /// Decrypts and merges `envelope`, then advances the marker to its
    /// `updated_at`.
    fn merge_remote(
        &self,
        key: &DerivedKey,
        envelope: &RemoteEnvelope,
        pre_merge: &Snapshot,
    ) -> SyncResult<MergeReport> {
        let payload = envelope.payload().unwrap_or_default();
        let value: Value = decrypt_with_key(key, payload)?;
        let remote = Snapshot::from_value(value);
        debug!(
            "decrypted remote snapshot from {} with {} fields",
            remote.timestamp,
            remote.fields().count()
        );

        let report = self.merger.apply(pre_merge, &remote)?;
        if let Some(updated_at) = envelope.updated_at {
            self.credentials.set_last_pull(updated_at)?;
        }
        Ok(report)
    }

    fn finish<T>(
        &self,
        direction: SyncDirection,
        operation: &str,
        result: SyncResult<T>,
        describe: impl FnOnce(&T) -> (Vec<SyncField>, String),
    ) -> SyncResult<T> {
        let entry = match &result {
            Ok(value) => {
                let (fields, detail) = describe(value);
                info!("{operation}: {detail}");
                ActivityEntry::ok(direction, fields, detail)
            }
            Err(e) => {
                error!("{operation} failed: {e}");
                ActivityEntry::error(direction, format!("{operation} failed: {e}"))
            }
        };
        self.record(entry);
        result
    }

    fn record(&self, entry: ActivityEntry) {
        let mut log = self.lock_activity();
        log.record(entry);
        if let Err(e) = log.persist(self.store.as_ref()) {
            warn!("could not persist sync activity log: {e}");
        }
    }

    fn lock_activity(&self) -> std::sync::MutexGuard<'_, SyncActivityLog> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
