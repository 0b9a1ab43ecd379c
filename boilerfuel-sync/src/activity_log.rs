//! Bounded history of sync attempts for the UI.
//!
//! Every engine operation appends exactly one entry. The log is observational
//! only: nothing in the protocol reads it back, and failing to persist it never
//! fails a sync.

use crate::error::SyncResult;
use crate::keys::ACTIVITY_LOG_KEY;
use crate::types::{SyncField, now_millis};
use boilerfuel_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// Entries kept when no capacity is configured.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 20;

/// Dominant transfer direction of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Ok,
    Error,
}

/// One recorded sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Epoch ms when the attempt finished.
    pub timestamp: i64,
    pub direction: SyncDirection,
    pub status: SyncOutcome,
    /// Fields the merge changed locally.
    #[serde(default)]
    pub fields: Vec<SyncField>,
    #[serde(default)]
    pub detail: String,
}

impl ActivityEntry {
    pub fn ok(direction: SyncDirection, fields: Vec<SyncField>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            direction,
            status: SyncOutcome::Ok,
            fields,
            detail: detail.into(),
        }
    }

    pub fn error(direction: SyncDirection, detail: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            direction,
            status: SyncOutcome::Error,
            fields: Vec::new(),
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SyncOutcome::Ok
    }
}

/// Ring buffer of [`ActivityEntry`], oldest first.
#[derive(Debug, Clone)]
pub struct SyncActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl SyncActivityLog {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Restores the persisted log. A missing or unreadable value starts an
    /// empty log; only a storage read failure is an error.
    pub fn load(store: &dyn KeyValueStore, capacity: usize) -> SyncResult<Self> {
        let mut log = Self::new(capacity);
        let Some(raw) = store.get(ACTIVITY_LOG_KEY)? else {
            return Ok(log);
        };

        match serde_json::from_str::<Vec<ActivityEntry>>(&raw) {
            Ok(entries) => {
                for entry in entries {
                    log.record(entry);
                }
            }
            Err(e) => warn!("discarding unreadable activity log: {e}"),
        }
        Ok(log)
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn record(&mut self, entry: ActivityEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&ActivityEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn persist(&self, store: &dyn KeyValueStore) -> SyncResult<()> {
        let json = serde_json::to_string(&self.entries)?;
        store.set(ACTIVITY_LOG_KEY, &json)?;
        Ok(())
    }
}

impl Default for SyncActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}
