//! HTTP client for the sync relay.
//!
//! The relay stores one opaque encrypted envelope per pairing token and never
//! sees plaintext. All four operations go through `/api/sync`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::types::RemoteEnvelope;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SYNC_PATH: &str = "/api/sync";

#[derive(Deserialize)]
struct CreateResponse {
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin typed wrapper over the relay's `/api/sync` endpoint.
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    url: String,
}

impl RelayClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{SYNC_PATH}", config.normalized_base_url()),
        })
    }

    /// Stores a first envelope and returns the token the relay assigned.
    pub async fn create(&self, encrypted_data: &str, updated_at: i64) -> SyncResult<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "action": "create",
                "encrypted_data": encrypted_data,
                "updated_at": updated_at,
            }))
            .send()
            .await?;

        let body: CreateResponse = check_status(resp, "create").await?.json().await?;
        debug!("relay created sync token {}", body.token);
        Ok(body.token)
    }

    /// Overwrites the envelope stored under `token`.
    pub async fn push(&self, token: &str, encrypted_data: &str, updated_at: i64) -> SyncResult<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "action": "push",
                "token": token,
                "encrypted_data": encrypted_data,
                "updated_at": updated_at,
            }))
            .send()
            .await?;

        check_status(resp, "push").await?;
        debug!("pushed envelope for token {token} at {updated_at}");
        Ok(())
    }

    /// Fetches the envelope if it is newer than `since`. With no marker the
    /// relay always returns it.
    pub async fn fetch(&self, token: &str, since: Option<i64>) -> SyncResult<RemoteEnvelope> {
        let mut url = format!("{}?token={}", self.url, urlencoding::encode(token));
        if let Some(since) = since {
            url.push_str(&format!("&since={since}"));
        }

        let resp = self.client.get(&url).send().await?;
        let envelope: RemoteEnvelope = check_status(resp, "fetch").await?.json().await?;
        debug!(
            "fetched token {token}: changed={}, updated_at={:?}",
            envelope.changed, envelope.updated_at
        );
        Ok(envelope)
    }

    /// Deletes the envelope. Deleting an unknown token succeeds.
    pub async fn delete(&self, token: &str) -> SyncResult<()> {
        let resp = self
            .client
            .delete(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        match check_status(resp, "delete").await {
            Ok(_) | Err(SyncError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Maps 404 to `NotFound` and any other non-2xx to `Api`, carrying the
/// relay's `{error}` message when it sent one.
async fn check_status(resp: Response, operation: &str) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        });

    if status == StatusCode::NOT_FOUND {
        return Err(SyncError::NotFound(format!("{operation}: {message}")));
    }
    Err(SyncError::Api {
        status: status.as_u16(),
        message,
    })
}
