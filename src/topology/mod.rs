//! Static Topology Module
//!
//! Describes the fixed set of shards that make up the cluster.
//!
//! ## Core Concepts
//! - **Shard**: a named partition of the keyspace with a numeric id and an HTTP address.
//! - **Topology**: the complete, validated shard map plus the id of the local shard.
//!   It is built once at startup and shared read-only (`Arc<Topology>`) by every task.
//! - **Fingerprint**: a stable hash of the shard map. Nodes attach it to forwarded
//!   requests so that two nodes disagreeing on the topology are detected instead of
//!   bouncing a request between each other.

pub mod loader;
pub mod types;

pub use loader::{load_topology, parse_topology};
pub use types::{Shard, ShardId, Topology, TopologyError};
