//! Storage and Request Dispatch Module
//!
//! Implements the per-shard key-value store and its HTTP surface.
//!
//! ## Core Concepts
//! - **Partitioning**: every key is owned by exactly one shard, `fnv1a64(key) % shard_count`.
//! - **Dual write**: a primary write stores the record and its replication outbox entry
//!   in a single redb transaction.
//! - **Dispatch**: `ShardDispatcher` serves keys it owns and forwards the rest verbatim
//!   to the owner, one hop at most.
//! - **Outbox endpoints**: replicas drain the outbox through `/next-replication-key`
//!   and `/delete-replication-key`.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod partitioner;
pub mod protocol;

pub use dispatcher::{ForwardError, ForwardRejection, Route, ShardDispatcher};
pub use engine::Store;
pub use error::StoreError;
pub use partitioner::ShardRouter;
