//! Topology file loading.
//!
//! The file is a list of `[[shards]]` tables:
//!
//! ```toml
//! [[shards]]
//! name = "shard-0"
//! shard_id = 0
//! address = "127.0.0.1:8080"
//! ```

use super::types::{Shard, Topology};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    shards: Vec<Shard>,
}

/// Parses topology TOML and validates it for the shard named `current_name`.
pub fn parse_topology(contents: &str, current_name: &str) -> Result<Topology> {
    let file: TopologyFile = toml::from_str(contents).context("parsing topology")?;
    let topology = Topology::from_shards(file.shards, current_name)?;
    Ok(topology)
}

/// Reads and validates the topology file at `path`.
pub fn load_topology(path: impl AsRef<Path>, current_name: &str) -> Result<Topology> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading topology file {}", path.display()))?;
    let topology = parse_topology(&contents, current_name)
        .with_context(|| format!("invalid topology file {}", path.display()))?;

    tracing::info!(
        shards = topology.shard_count(),
        current = %topology.current(),
        fingerprint = %format!("{:016x}", topology.fingerprint()),
        "Loaded topology from {}",
        path.display()
    );

    Ok(topology)
}
