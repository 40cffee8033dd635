use clap::Parser;
use shardkv::config::{NodeArgs, NodeConfig};
use shardkv::replication::{ReplicationClient, spawn_replication_client};
use shardkv::storage::handlers::router;
use shardkv::storage::{ShardDispatcher, Store};
use shardkv::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NodeArgs::parse();
    telemetry::init(&args.log_level);

    // 1. Configuration (fatal on any topology error):
    let config = NodeConfig::from_args(args)?;
    let topology = config.topology.clone();

    tracing::info!(
        "Starting shard {:?} (id {}) of {} on {}{}",
        topology.current_name(),
        topology.current(),
        topology.shard_count(),
        config.http_addr,
        if config.replica { " as replica" } else { "" }
    );

    // 2. Storage layer:
    let store = Arc::new(Store::open(&config.db_path, config.replica)?);
    let dispatcher = Arc::new(ShardDispatcher::new(
        store.clone(),
        topology.clone(),
        config.forward_timeout,
    ));

    let shutdown = CancellationToken::new();

    // 3. Replication client (replicas only):
    let replication = if config.replica {
        let client = ReplicationClient::new(
            store.clone(),
            config.primary_addr(),
            config.replication.clone(),
        );
        Some(spawn_replication_client(client, shutdown.child_token()))
    } else {
        None
    };

    // 4. Stats reporter:
    let stats_dispatcher = dispatcher.clone();
    let stats_cancel = shutdown.child_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);

        loop {
            tokio::select! {
                _ = stats_cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            match stats_dispatcher.stats() {
                Ok(stats) => tracing::info!(
                    records = stats.records,
                    pending_replication = stats.pending_replication,
                    read_only = stats.read_only,
                    "Shard stats"
                ),
                Err(e) => tracing::warn!("Failed to collect stats: {}", e),
            }
        }
    });

    // 5. HTTP server:
    let app = router(dispatcher);
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;

    tracing::info!("HTTP server listening on {}", config.http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = replication {
        handle.await?;
    }

    Ok(())
}
