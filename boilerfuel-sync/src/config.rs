//! Sync engine configuration.

use crate::activity_log::DEFAULT_ACTIVITY_CAPACITY;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Configuration for the sync engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the relay (e.g., "https://boilerfuel.vercel.app").
    /// `/api/sync` is appended.
    pub api_base_url: String,

    /// Per-request timeout applied by the HTTP client.
    pub request_timeout_secs: u64,

    /// Number of entries kept in the activity log.
    pub activity_log_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://boilerfuel.vercel.app".to_string(),
            request_timeout_secs: 30,
            activity_log_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Default settings pointed at another relay (a local dev server or a
    /// mock in tests).
    pub fn with_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    /// Checks the settings the engine cannot work without.
    pub fn validate(&self) -> SyncResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("api_base_url is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.activity_log_capacity == 0 {
            return Err(SyncError::Config(
                "activity_log_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub(crate) fn normalized_base_url(&self) -> &str {
        self.api_base_url.trim().trim_end_matches('/')
    }
}
