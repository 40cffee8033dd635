//! Node configuration.
//!
//! Command-line flags are parsed once into [`NodeArgs`] and turned into an
//! immutable [`NodeConfig`] that `main` hands to every component. Nothing reads
//! configuration from global state afterwards.

use crate::replication::ReplicationConfig;
use crate::topology::{Topology, load_topology};

use anyhow::Result;
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "shardkv", about = "Statically sharded key-value store node")]
pub struct NodeArgs {
    /// Address the HTTP server binds to.
    #[arg(long)]
    pub http_addr: SocketAddr,

    /// Path of the database file, created if missing.
    #[arg(long)]
    pub db_location: PathBuf,

    /// TOML file describing every shard of the cluster.
    #[arg(long)]
    pub config_file: PathBuf,

    /// Name of the shard this node serves.
    #[arg(long)]
    pub shard: String,

    /// Run as a read-only replica of the shard's primary.
    #[arg(long)]
    pub replica: bool,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Pause between polls when the primary has nothing to replicate.
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Pause after a failed replication cycle.
    #[arg(long, default_value_t = 1000)]
    pub error_backoff_ms: u64,

    /// Timeout for forwarded and replication requests.
    #[arg(long, default_value_t = 5000)]
    pub request_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("replica binds {0}, the address of its own primary")]
    ReplicaOfItself(SocketAddr),
}

/// Validated process configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub http_addr: SocketAddr,
    pub db_path: PathBuf,
    pub replica: bool,
    pub topology: Arc<Topology>,
    pub replication: ReplicationConfig,
    pub forward_timeout: Duration,
}

impl NodeConfig {
    /// Loads the topology file and validates the flags.
    pub fn from_args(args: NodeArgs) -> Result<Self> {
        let topology = load_topology(&args.config_file, &args.shard)?;
        let config = Self::with_topology(args, topology)?;
        Ok(config)
    }

    pub fn with_topology(args: NodeArgs, topology: Topology) -> Result<Self, ConfigError> {
        let timeout = non_zero("request-timeout-ms", args.request_timeout_ms)?;
        let replication = ReplicationConfig {
            idle_interval: non_zero("poll-interval-ms", args.poll_interval_ms)?,
            error_backoff: non_zero("error-backoff-ms", args.error_backoff_ms)?,
            request_timeout: timeout,
        };

        if args.replica && resolves_to(topology.current_address(), args.http_addr) {
            return Err(ConfigError::ReplicaOfItself(args.http_addr));
        }

        Ok(Self {
            http_addr: args.http_addr,
            db_path: args.db_location,
            replica: args.replica,
            topology: Arc::new(topology),
            replication,
            forward_timeout: timeout,
        })
    }

    /// Address of the primary a replica pulls from.
    pub fn primary_addr(&self) -> &str {
        self.topology.current_address()
    }
}

/// Whether the topology address `addr` (an IP or a hostname with a port)
/// names `bound`. Unresolvable addresses never match.
fn resolves_to(addr: &str, bound: SocketAddr) -> bool {
    match addr.to_socket_addrs() {
        Ok(mut resolved) => resolved.any(|candidate| candidate == bound),
        Err(e) => {
            tracing::debug!("Could not resolve shard address {}: {}", addr, e);
            false
        }
    }
}

fn non_zero(name: &'static str, millis: u64) -> Result<Duration, ConfigError> {
    if millis == 0 {
        return Err(ConfigError::ZeroDuration(name));
    }
    Ok(Duration::from_millis(millis))
}
