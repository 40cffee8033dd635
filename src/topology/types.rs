use crate::storage::partitioner::fnv1a_64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Numeric identifier of a shard, in `0..shard_count`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the topology file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shard {
    pub name: String,
    pub shard_id: u32,
    /// `host:port` of the shard's primary HTTP endpoint.
    pub address: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology has no shards")]
    Empty,

    #[error("duplicate shard id {0}")]
    DuplicateId(u32),

    #[error("duplicate shard name {0:?}")]
    DuplicateName(String),

    #[error("shard id {0} is missing (ids must cover 0..{1})")]
    MissingId(u32, u32),

    #[error("shard {0:?} is not present in the topology")]
    UnknownShard(String),
}

/// Validated, immutable view of the cluster.
///
/// Construction is the only place where the topology is checked. Once a
/// `Topology` exists the shard count is non-zero and every id in
/// `0..shard_count` has an address, so routing never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    shards: Vec<Shard>,
    addrs: BTreeMap<ShardId, String>,
    current: ShardId,
    current_name: String,
}

impl Topology {
    /// Validates `shards` and selects `current_name` as the local shard.
    pub fn from_shards(shards: Vec<Shard>, current_name: &str) -> Result<Self, TopologyError> {
        if shards.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut addrs = BTreeMap::new();
        let mut names = HashSet::new();
        let mut current = None;

        for shard in &shards {
            if !names.insert(shard.name.as_str()) {
                return Err(TopologyError::DuplicateName(shard.name.clone()));
            }
            let id = ShardId(shard.shard_id);
            if addrs.insert(id, shard.address.clone()).is_some() {
                return Err(TopologyError::DuplicateId(shard.shard_id));
            }
            if shard.name == current_name {
                current = Some(id);
            }
        }

        let count = shards.len() as u32;
        if let Some(missing) = (0..count).find(|id| !addrs.contains_key(&ShardId(*id))) {
            return Err(TopologyError::MissingId(missing, count));
        }

        let current = current.ok_or_else(|| TopologyError::UnknownShard(current_name.to_string()))?;

        let mut shards = shards;
        shards.sort_by_key(|shard| shard.shard_id);

        Ok(Self {
            shards,
            addrs,
            current,
            current_name: current_name.to_string(),
        })
    }

    pub fn shard_count(&self) -> u32 {
        self.addrs.len() as u32
    }

    pub fn current(&self) -> ShardId {
        self.current
    }

    pub fn current_name(&self) -> &str {
        &self.current_name
    }

    pub fn address(&self, shard: ShardId) -> Option<&str> {
        self.addrs.get(&shard).map(String::as_str)
    }

    /// Address of the local shard's primary.
    pub fn current_address(&self) -> &str {
        // `current` was taken from the validated shard list.
        self.addrs.get(&self.current).map(String::as_str).unwrap_or_default()
    }

    /// Shards ordered by id.
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Stable hash of the shard map, independent of which shard is local.
    pub fn fingerprint(&self) -> u64 {
        let mut canonical = String::new();
        for shard in &self.shards {
            canonical.push_str(&format!("{}={}@{};", shard.shard_id, shard.name, shard.address));
        }
        fnv1a_64(canonical.as_bytes())
    }
}
