//! Replication Module Tests
//!
//! Runs the replication client against live primaries and against stub
//! primaries that return scripted responses.

#[cfg(test)]
mod tests {
    use crate::replication::{
        AckOutcome, PollOutcome, ReplicationClient, ReplicationConfig, ReplicationError,
        spawn_replication_client,
    };
    use crate::storage::protocol::{
        ENDPOINT_DELETE_REPLICATION_KEY, ENDPOINT_NEXT_REPLICATION_KEY, ErrorCode,
    };
    use crate::test_support::{dead_addr, eventually, spawn_cluster, temp_store};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn fast_config() -> ReplicationConfig {
        ReplicationConfig {
            idle_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
        }
    }

    /// Serves a primary that always returns `next_body` and answers every
    /// acknowledgment with `ack_status`.
    async fn stub_primary(next_body: &'static str, ack_status: StatusCode) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route(ENDPOINT_NEXT_REPLICATION_KEY, get(move || async move { next_body }))
            .route(
                ENDPOINT_DELETE_REPLICATION_KEY,
                get(move || async move { (ack_status, "stub\n") }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        addr
    }

    /// Accepts connections and holds them open without ever responding.
    async fn silent_primary() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        addr
    }

    // ============================================================
    // SINGLE CYCLE
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_poll_empty_outbox() {
        let shards = spawn_cluster(1).await;
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), shards[0].addr.to_string(), fast_config());

        let outcome = client.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::Empty);
        assert_eq!(replica.len().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_poll_applies_and_acknowledges() {
        let shards = spawn_cluster(1).await;
        let primary = &shards[0];
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), primary.addr.to_string(), fast_config());
        primary.store.put(b"a", b"1").unwrap();

        let outcome = client.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Applied {
                key: "a".to_string(),
                ack: AckOutcome::Acknowledged,
            }
        );
        assert_eq!(replica.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(primary.store.next_outbox_entry().unwrap(), None);
        // Replicated writes never enter the replica's own outbox.
        assert_eq!(replica.outbox_len().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_newer_write_is_delivered_on_next_poll() {
        let shards = spawn_cluster(1).await;
        let primary = &shards[0];
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), primary.addr.to_string(), fast_config());

        primary.store.put(b"a", b"1").unwrap();
        client.poll_once().await.unwrap();
        primary.store.put(b"a", b"2").unwrap();
        client.poll_once().await.unwrap();

        assert_eq!(replica.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(client.poll_once().await.unwrap(), PollOutcome::Empty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_superseded_ack_still_applies() {
        let next = r#"{"status":"entry","key":"a","value":"1"}"#;

        for (status, expected) in [
            (StatusCode::CONFLICT, AckOutcome::Mismatch),
            (StatusCode::NOT_FOUND, AckOutcome::NotFound),
        ] {
            let addr = stub_primary(next, status).await;
            let (_dir, replica) = temp_store(true);
            let client = ReplicationClient::new(replica.clone(), addr.to_string(), fast_config());

            let outcome = client.poll_once().await.unwrap();

            assert_eq!(
                outcome,
                PollOutcome::Applied {
                    key: "a".to_string(),
                    ack: expected,
                }
            );
            assert_eq!(replica.get(b"a").unwrap(), Some(b"1".to_vec()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_ack_is_reported() {
        let next = r#"{"status":"entry","key":"a","value":"1"}"#;
        let addr = stub_primary(next, StatusCode::INTERNAL_SERVER_ERROR).await;
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), addr.to_string(), fast_config());

        let outcome = client.poll_once().await.unwrap();

        assert!(matches!(
            outcome,
            PollOutcome::Applied {
                ack: AckOutcome::Failed { .. },
                ..
            }
        ));
        assert_eq!(replica.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    // ============================================================
    // FAILURES
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unreachable_primary() {
        let addr = dead_addr().await;
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica, addr.to_string(), fast_config());

        let err = client.poll_once().await.unwrap_err();

        assert!(matches!(err, ReplicationError::Network(_)));
        assert_eq!(err.code(), ErrorCode::NetworkError);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hung_primary_times_out() {
        let addr = silent_primary().await;
        let (_dir, replica) = temp_store(true);
        let config = ReplicationConfig {
            request_timeout: Duration::from_millis(200),
            ..fast_config()
        };
        let client = ReplicationClient::new(replica.clone(), addr.to_string(), config);

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_secs(2), client.poll_once())
            .await
            .expect("poll did not honour the request timeout");

        assert!(matches!(result, Err(ReplicationError::Network(_))));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(replica.len().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_malformed_response() {
        let addr = stub_primary("definitely not json", StatusCode::OK).await;
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), addr.to_string(), fast_config());

        let err = client.poll_once().await.unwrap_err();

        assert!(matches!(err, ReplicationError::Decode(_)));
        assert_eq!(replica.len().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_primary_reported_error() {
        let next = r#"{"status":"error","code":"IoError","message":"disk full"}"#;
        let addr = stub_primary(next, StatusCode::OK).await;
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), addr.to_string(), fast_config());

        let err = client.poll_once().await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(err.to_string().contains("disk full"));
        assert_eq!(replica.len().unwrap(), 0);
    }

    // ============================================================
    // BACKGROUND LOOP
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replica_converges() {
        let shards = spawn_cluster(1).await;
        let primary = shards[0].store.clone();
        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), shards[0].addr.to_string(), fast_config());

        let cancel = CancellationToken::new();
        let handle = spawn_replication_client(client, cancel.clone());

        for i in 0..20 {
            primary
                .put(format!("key-{}", i).as_bytes(), format!("value-{}", i).as_bytes())
                .unwrap();
        }
        primary.put(b"key-0", b"latest").unwrap();

        let converged = eventually(Duration::from_secs(5), || {
            primary.outbox_len().unwrap() == 0 && replica.len().unwrap() == 20
        })
        .await;
        assert!(converged, "replica did not catch up");

        assert_eq!(replica.get(b"key-0").unwrap(), Some(b"latest".to_vec()));
        for i in 1..20 {
            assert_eq!(
                replica.get(format!("key-{}", i).as_bytes()).unwrap(),
                Some(format!("value-{}", i).into_bytes())
            );
        }
        assert_eq!(replica.outbox_len().unwrap(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("replication loop did not stop")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_loop_recovers_after_primary_starts() {
        // The loop keeps retrying while nothing listens on the address.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_dir, replica) = temp_store(true);
        let client = ReplicationClient::new(replica.clone(), addr.to_string(), fast_config());
        let cancel = CancellationToken::new();
        let handle = spawn_replication_client(client, cancel.clone());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let next = r#"{"status":"entry","key":"late","value":"1"}"#;
        let listener = TcpListener::bind(addr).await.unwrap();
        let app = Router::new()
            .route(ENDPOINT_NEXT_REPLICATION_KEY, get(move || async move { next }))
            .route(ENDPOINT_DELETE_REPLICATION_KEY, get(|| async { "ok\n" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let applied = eventually(Duration::from_secs(5), || {
            replica.get(b"late").unwrap().is_some()
        })
        .await;
        assert!(applied);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("replication loop did not stop")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_interrupts_in_flight_request() {
        let addr = silent_primary().await;
        let (_dir, replica) = temp_store(true);
        let config = ReplicationConfig {
            request_timeout: Duration::from_secs(60),
            ..fast_config()
        };
        let client = ReplicationClient::new(replica, addr.to_string(), config);
        let cancel = CancellationToken::new();
        let handle = spawn_replication_client(client, cancel.clone());

        // The first poll is now parked on a primary that never answers.
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("replication loop did not stop")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_interrupts_backoff() {
        let addr = dead_addr().await;
        let (_dir, replica) = temp_store(true);
        let config = ReplicationConfig {
            error_backoff: Duration::from_secs(60),
            ..fast_config()
        };
        let client = ReplicationClient::new(replica, addr.to_string(), config);
        let cancel = CancellationToken::new();
        let handle = spawn_replication_client(client, cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("replication loop did not stop")
            .unwrap();
    }
}
