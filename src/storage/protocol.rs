//! Storage Network Protocol
//!
//! Defines the HTTP endpoints and Data Transfer Objects (DTOs) shared by the
//! request handlers, the forwarding path and the replication client.
//!
//! Every endpoint is a plain `GET` with query parameters so that a request can be
//! forwarded to another shard verbatim, path and query untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

// --- API Endpoints ---

/// Client read of a single key.
pub const ENDPOINT_GET: &str = "/get";
/// Client write of a single key.
pub const ENDPOINT_SET: &str = "/set";
/// Removes every local record this shard no longer owns.
pub const ENDPOINT_PURGE: &str = "/purge";
/// Replica poll for the next pending outbox entry.
pub const ENDPOINT_NEXT_REPLICATION_KEY: &str = "/next-replication-key";
/// Replica acknowledgment of an applied outbox entry.
pub const ENDPOINT_DELETE_REPLICATION_KEY: &str = "/delete-replication-key";
/// Node statistics (JSON).
pub const ENDPOINT_STATS: &str = "/stats";

// --- Forwarding headers ---

/// Id of the shard that forwarded the request. Its presence marks a request
/// that already used its single hop.
pub const HEADER_FORWARDED_BY: &str = "x-shardkv-forwarded-by";
/// Hex fingerprint of the forwarding node's topology.
pub const HEADER_TOPOLOGY: &str = "x-shardkv-topology";

/// Body returned by a successful acknowledgment.
pub const ACK_OK: &str = "ok";

// --- Data Transfer Objects ---

/// Query for `/get`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: String,
}

/// Query for `/set` and `/delete-replication-key`.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyValueQuery {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Fixed error vocabulary carried on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Mismatch,
    ReadOnly,
    IoError,
    NetworkError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NotFound",
            Self::Mismatch => "Mismatch",
            Self::ReadOnly => "ReadOnly",
            Self::IoError => "IoError",
            Self::NetworkError => "NetworkError",
        };
        f.write_str(name)
    }
}

/// Response of `/next-replication-key`.
///
/// Serialized with an explicit `status` tag:
///
/// ```json
/// {"status":"entry","key":"a","value":"1"}
/// {"status":"empty"}
/// {"status":"error","code":"IoError","message":"..."}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NextEntryResponse {
    Entry { key: String, value: String },
    Empty,
    Error { code: ErrorCode, message: String },
}

/// Response of `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub shard_id: u32,
    pub shard_name: String,
    pub read_only: bool,
    pub records: u64,
    pub pending_replication: u64,
}
