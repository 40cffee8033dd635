//! Pull-based replication client.
//!
//! Runs on a replica and drains the outbox of one primary:
//!
//! 1. **Poll**: `GET /next-replication-key` on the primary.
//! 2. **Apply**: write the entry locally with `Store::put_replica`, bypassing the
//!    local outbox so the entry is never replicated further.
//! 3. **Acknowledge**: `GET /delete-replication-key` with the exact (key, value)
//!    that was applied. The primary removes the entry only if it was not
//!    overwritten in the meantime; otherwise the newer value is delivered on a
//!    later poll.
//!
//! Delivery is at-least-once. An entry whose apply fails is not acknowledged
//! and comes back on the next poll; an acknowledgment that fails leaves the
//! local apply in place, and re-applying the same last-write-wins value is
//! harmless.

use crate::storage::Store;
use crate::storage::StoreError;
use crate::storage::protocol::{
    ENDPOINT_DELETE_REPLICATION_KEY, ENDPOINT_NEXT_REPLICATION_KEY, ErrorCode, NextEntryResponse,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timing of the replication loop.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Pause after an empty poll.
    pub idle_interval: Duration,
    /// Pause after a failed cycle.
    pub error_backoff: Duration,
    /// Timeout applied to every request sent to the primary.
    pub request_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of acknowledging an applied entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    /// The primary no longer queues the key (another replica acknowledged it).
    NotFound,
    /// The key was overwritten on the primary after we fetched it.
    Mismatch,
    Failed { reason: String },
}

/// Result of one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Empty,
    Applied { key: String, ack: AckOutcome },
}

/// Failures that abort a poll cycle. All of them are transient: the loop logs
/// them and retries after `error_backoff`.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("primary reported {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("applying key {key:?} failed: {source}")]
    Apply {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl ReplicationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) | Self::Decode(_) => ErrorCode::NetworkError,
            Self::Remote { code, .. } => *code,
            Self::Apply { source, .. } => source.code(),
        }
    }
}

pub struct ReplicationClient {
    store: Arc<Store>,
    primary_addr: String,
    http_client: reqwest::Client,
    config: ReplicationConfig,
}

impl ReplicationClient {
    pub fn new(store: Arc<Store>, primary_addr: impl Into<String>, config: ReplicationConfig) -> Self {
        Self {
            store,
            primary_addr: primary_addr.into(),
            http_client: reqwest::Client::new(),
            config,
        }
    }

    /// Polls the primary until `cancel` fires.
    ///
    /// Cancellation interrupts both the pause between polls and an in-flight
    /// request. A cycle cut short before its acknowledgment simply leaves the
    /// entry queued on the primary.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Replicating from primary {}", self.primary_addr);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once() => outcome,
            };

            let pause = match outcome {
                Ok(PollOutcome::Applied { .. }) => continue,
                Ok(PollOutcome::Empty) => self.config.idle_interval,
                Err(e) => {
                    tracing::warn!(
                        code = %e.code(),
                        "Replication from {} failed: {}",
                        self.primary_addr,
                        e
                    );
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Replication from {} stopped", self.primary_addr);
    }

    /// Runs a single poll -> apply -> acknowledge cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome, ReplicationError> {
        let (key, value) = match self.fetch_next().await? {
            NextEntryResponse::Empty => return Ok(PollOutcome::Empty),
            NextEntryResponse::Error { code, message } => {
                return Err(ReplicationError::Remote { code, message });
            }
            NextEntryResponse::Entry { key, value } => (key, value),
        };

        self.store
            .put_replica(key.as_bytes(), value.as_bytes())
            .map_err(|source| ReplicationError::Apply {
                key: key.clone(),
                source,
            })?;

        tracing::debug!("Applied replicated key {:?}", key);

        let ack = match self.acknowledge(&key, &value).await {
            Ok(ack) => ack,
            Err(e) => AckOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match &ack {
            AckOutcome::Acknowledged => {}
            AckOutcome::NotFound | AckOutcome::Mismatch => {
                tracing::info!(
                    "Acknowledgment of key {:?} superseded on {}: {:?}",
                    key,
                    self.primary_addr,
                    ack
                );
            }
            AckOutcome::Failed { reason } => {
                tracing::warn!(
                    "Acknowledgment of key {:?} to {} failed: {}",
                    key,
                    self.primary_addr,
                    reason
                );
            }
        }

        Ok(PollOutcome::Applied { key, ack })
    }

    async fn fetch_next(&self) -> Result<NextEntryResponse, ReplicationError> {
        let url = format!("http://{}{}", self.primary_addr, ENDPOINT_NEXT_REPLICATION_KEY);
        let body = self
            .http_client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?
            .bytes()
            .await?;

        Ok(serde_json::from_slice(&body)?)
    }

    async fn acknowledge(&self, key: &str, value: &str) -> Result<AckOutcome, ReplicationError> {
        let url = format!("http://{}{}", self.primary_addr, ENDPOINT_DELETE_REPLICATION_KEY);
        let response = self
            .http_client
            .get(url)
            .query(&[("key", key), ("value", value)])
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let outcome = match status.as_u16() {
            200..=299 => AckOutcome::Acknowledged,
            404 => AckOutcome::NotFound,
            409 => AckOutcome::Mismatch,
            _ => {
                let body = response.text().await.unwrap_or_default();
                AckOutcome::Failed {
                    reason: format!("{}: {}", status, body.trim()),
                }
            }
        };
        Ok(outcome)
    }
}

/// Spawns `client.run` on the runtime. Cancel `cancel` and await the handle to
/// stop it.
pub fn spawn_replication_client(
    client: ReplicationClient,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        client.run(cancel).await;
    })
}
