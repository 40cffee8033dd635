//! Request dispatching for a single shard.
//!
//! `ShardDispatcher` decides for every key whether the local store serves it or
//! whether the request has to travel to the owning shard. Forwarding is a single
//! hop: the request is replayed verbatim against the owner and its response is
//! relayed unchanged. There is no caching and no retry on the forward path.

use super::engine::Store;
use super::error::StoreError;
use super::partitioner::ShardRouter;
use super::protocol::{
    ErrorCode, HEADER_FORWARDED_BY, HEADER_TOPOLOGY, NextEntryResponse, StatsResponse,
};
use crate::topology::{ShardId, Topology};

use std::sync::Arc;
use std::time::Duration;

/// Where a key is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote { shard: ShardId, addr: String },
}

/// Status and body relayed back from the owning shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("request to shard {shard} at {addr} failed: {source}")]
pub struct ForwardError {
    pub shard: ShardId,
    pub addr: String,
    #[source]
    pub source: reqwest::Error,
}

/// Reasons to refuse a request that another shard forwarded to us.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ForwardRejection {
    #[error("topology mismatch: local {local:016x}, sender {remote}")]
    TopologyMismatch { local: u64, remote: String },

    #[error("shard {owner} owns this key, refusing second hop from shard {from}")]
    SecondHop { from: String, owner: ShardId },
}

pub struct ShardDispatcher {
    store: Arc<Store>,
    router: ShardRouter,
    http_client: reqwest::Client,
    forward_timeout: Duration,
    fingerprint: String,
}

impl ShardDispatcher {
    pub fn new(store: Arc<Store>, topology: Arc<Topology>, forward_timeout: Duration) -> Self {
        let fingerprint = format!("{:016x}", topology.fingerprint());
        Self {
            store,
            router: ShardRouter::new(topology),
            http_client: reqwest::Client::new(),
            forward_timeout,
            fingerprint,
        }
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn current(&self) -> ShardId {
        self.router.current()
    }

    pub fn route(&self, key: &[u8]) -> Route {
        let owner = self.router.owner(key);
        if owner == self.router.current() {
            return Route::Local;
        }
        match self.router.address_of(owner) {
            Some(addr) => Route::Remote {
                shard: owner,
                addr: addr.to_string(),
            },
            // Unreachable with a validated topology; serve locally rather than drop.
            None => Route::Local,
        }
    }

    /// Validates the forwarding headers of an inbound request.
    ///
    /// Requests without `x-shardkv-forwarded-by` come from clients and are
    /// always admitted. A forwarded request must carry our topology
    /// fingerprint (a missing one counts as a mismatch) and must be for a key
    /// we own; otherwise forwarding it again could loop forever between nodes
    /// that disagree on ownership.
    pub fn admit(
        &self,
        forwarded_by: Option<&str>,
        topology: Option<&str>,
        key: &[u8],
    ) -> Result<(), ForwardRejection> {
        let Some(from) = forwarded_by else {
            return Ok(());
        };

        if topology != Some(self.fingerprint.as_str()) {
            return Err(ForwardRejection::TopologyMismatch {
                local: self.router.topology().fingerprint(),
                remote: topology.unwrap_or("<missing>").to_string(),
            });
        }

        let owner = self.router.owner(key);
        if owner != self.router.current() {
            return Err(ForwardRejection::SecondHop {
                from: from.to_string(),
                owner,
            });
        }

        Ok(())
    }

    pub fn get_local(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.get(key)
    }

    pub fn set_local(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.store.put(key, value)
    }

    /// Replays `path_and_query` against `shard` at `addr` and returns its
    /// response. `shard` and `addr` come from [`ShardDispatcher::route`].
    pub async fn forward(
        &self,
        shard: ShardId,
        addr: &str,
        path_and_query: &str,
    ) -> Result<ForwardedResponse, ForwardError> {
        let url = format!("http://{}{}", addr, path_and_query);
        tracing::debug!(
            from = %self.router.current(),
            to = %shard,
            "Forwarding request to {}",
            url
        );

        let request_error = |source| ForwardError {
            shard,
            addr: addr.to_string(),
            source,
        };

        let response = self
            .http_client
            .get(&url)
            .header(HEADER_FORWARDED_BY, self.router.current().to_string())
            .header(HEADER_TOPOLOGY, self.fingerprint.as_str())
            .timeout(self.forward_timeout)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(request_error)?;

        Ok(ForwardedResponse { status, body })
    }

    /// Removes every local record owned by another shard.
    ///
    /// Meant to be run on each node after a new topology has been rolled out.
    pub async fn purge(&self) -> Result<usize, StoreError> {
        let store = self.store.clone();
        let router = self.router.clone();

        tokio::task::spawn_blocking(move || store.purge(|key| !router.is_local(key)))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    pub fn next_replication_entry(&self) -> NextEntryResponse {
        match self.store.next_outbox_entry() {
            Ok(None) => NextEntryResponse::Empty,
            Ok(Some((key, value))) => match (String::from_utf8(key), String::from_utf8(value)) {
                (Ok(key), Ok(value)) => NextEntryResponse::Entry { key, value },
                _ => NextEntryResponse::Error {
                    code: ErrorCode::IoError,
                    message: "outbox entry is not valid UTF-8".to_string(),
                },
            },
            Err(e) => {
                tracing::error!("Failed to read replication outbox: {}", e);
                NextEntryResponse::Error {
                    code: e.code(),
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn ack_replication_entry(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.store.ack_outbox_entry(key, value)
    }

    pub fn stats(&self) -> Result<StatsResponse, StoreError> {
        let topology = self.router.topology();
        Ok(StatsResponse {
            shard_id: topology.current().0,
            shard_name: topology.current_name().to_string(),
            read_only: self.store.is_read_only(),
            records: self.store.len()?,
            pending_replication: self.store.outbox_len()?,
        })
    }
}
