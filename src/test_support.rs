//! Shared test utilities: temporary stores and in-process shard clusters.

use crate::storage::handlers::router;
use crate::storage::{ShardDispatcher, Store};
use crate::topology::{Shard, Topology};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// A store in a temporary directory. Keep the `TempDir` alive for the duration
/// of the test.
pub fn temp_store(read_only: bool) -> (TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("shard.redb"), read_only).unwrap();
    (dir, Arc::new(store))
}

/// One node of an in-process cluster, serving HTTP on `addr`.
pub struct TestShard {
    pub addr: SocketAddr,
    pub store: Arc<Store>,
    pub dispatcher: Arc<ShardDispatcher>,
    _dir: TempDir,
}

impl TestShard {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

pub fn topology_for(addrs: &[SocketAddr], current: usize) -> Topology {
    let shards = addrs
        .iter()
        .enumerate()
        .map(|(id, addr)| Shard {
            name: format!("shard-{}", id),
            shard_id: id as u32,
            address: addr.to_string(),
        })
        .collect();
    Topology::from_shards(shards, &format!("shard-{}", current)).unwrap()
}

/// Starts `count` primaries that share one topology.
pub async fn spawn_cluster(count: usize) -> Vec<TestShard> {
    let mut listeners = Vec::with_capacity(count);
    for _ in 0..count {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let addrs: Vec<SocketAddr> = listeners
        .iter()
        .map(|listener| listener.local_addr().unwrap())
        .collect();

    let mut shards = Vec::with_capacity(count);
    for (id, listener) in listeners.into_iter().enumerate() {
        let topology = topology_for(&addrs, id);
        shards.push(serve(listener, topology, false).await);
    }
    shards
}

/// Starts a node on `listener` for `topology`.
pub async fn serve(listener: TcpListener, topology: Topology, read_only: bool) -> TestShard {
    let addr = listener.local_addr().unwrap();
    let (dir, store) = temp_store(read_only);
    let dispatcher = Arc::new(ShardDispatcher::new(
        store.clone(),
        Arc::new(topology),
        TEST_TIMEOUT,
    ));

    let app = router(dispatcher.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestShard {
        addr,
        store,
        dispatcher,
        _dir: dir,
    }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub async fn http_get(url: &str) -> (u16, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
