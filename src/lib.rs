//! Sharded, Replicated Key-Value Store Library
//!
//! This library crate defines the modules that make up a `shardkv` node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`topology`**: The static cluster map. Loads the shard list from TOML and validates
//!   it once at startup.
//! - **`storage`**: The per-shard state layer. A redb-backed store that writes every
//!   record together with a replication outbox entry, the FNV-1a shard router, and the
//!   HTTP dispatcher that serves owned keys and forwards the rest to their owner.
//! - **`replication`**: The replica side. A cancellable background task that pulls
//!   outbox entries from a primary, applies them and acknowledges them.
//! - **`config`**: Command-line flags and the immutable `NodeConfig` built from them.
//! - **`telemetry`**: `tracing` subscriber setup.

pub mod config;
pub mod replication;
pub mod storage;
pub mod telemetry;
pub mod topology;

#[cfg(test)]
mod test_support;
