use crate::topology::{ShardId, Topology};
use std::sync::Arc;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over raw bytes.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps a key onto `0..shard_count`.
///
/// `shard_count` must be non-zero; a validated `Topology` guarantees that.
pub fn shard_for(key: &[u8], shard_count: u32) -> ShardId {
    ShardId((fnv1a_64(key) % shard_count as u64) as u32)
}

/// Computes key ownership for the local node.
///
/// Ownership is never stored: every process holding the same topology
/// computes the same owner for the same key.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    topology: Arc<Topology>,
}

impl ShardRouter {
    pub fn new(topology: Arc<Topology>) -> Self {
        Self { topology }
    }

    pub fn owner(&self, key: &[u8]) -> ShardId {
        shard_for(key, self.topology.shard_count())
    }

    pub fn is_local(&self, key: &[u8]) -> bool {
        self.owner(key) == self.topology.current()
    }

    pub fn current(&self) -> ShardId {
        self.topology.current()
    }

    pub fn address_of(&self, shard: ShardId) -> Option<&str> {
        self.topology.address(shard)
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }
}
