//! Replication Module
//!
//! Keeps read-only replicas eventually consistent with their primary.
//!
//! ## Architecture Overview
//! Replication is **pull-based** and driven entirely by the replica:
//! 1. **Outbox**: every primary write also lands in the store's replication outbox
//!    (one pending value per key, last write wins).
//! 2. **Polling**: the `ReplicationClient` repeatedly fetches the next pending entry
//!    from its primary.
//! 3. **Apply + Ack**: the entry is written locally and then acknowledged with its
//!    exact value; the primary drops it only if nothing newer replaced it.
//!
//! There is exactly one in-flight poll per client, and the client runs until its
//! cancellation token fires.

pub mod client;

pub use client::{
    AckOutcome, PollOutcome, ReplicationClient, ReplicationConfig, ReplicationError,
    spawn_replication_client,
};

#[cfg(test)]
mod tests;
