use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, Uri},
    routing::get,
};
use std::sync::Arc;

use super::dispatcher::{ForwardRejection, Route, ShardDispatcher};
use super::error::StoreError;
use super::protocol::{
    ACK_OK, ENDPOINT_DELETE_REPLICATION_KEY, ENDPOINT_GET, ENDPOINT_NEXT_REPLICATION_KEY,
    ENDPOINT_PURGE, ENDPOINT_SET, ENDPOINT_STATS, HEADER_FORWARDED_BY, HEADER_TOPOLOGY, KeyQuery,
    KeyValueQuery, NextEntryResponse, StatsResponse,
};
use crate::topology::ShardId;

/// Builds the HTTP surface of a shard.
pub fn router(dispatcher: Arc<ShardDispatcher>) -> Router {
    Router::new()
        .route(ENDPOINT_GET, get(handle_get))
        .route(ENDPOINT_SET, get(handle_set))
        .route(ENDPOINT_PURGE, get(handle_purge))
        .route(ENDPOINT_NEXT_REPLICATION_KEY, get(handle_next_replication_key))
        .route(ENDPOINT_DELETE_REPLICATION_KEY, get(handle_delete_replication_key))
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(dispatcher))
}

pub async fn handle_get(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<KeyQuery>,
) -> (StatusCode, String) {
    let key = query.key.as_bytes();

    if let Err(rejection) = admit(&dispatcher, &headers, key) {
        return rejection;
    }

    match dispatcher.route(key) {
        Route::Remote { shard, addr } => relay(&dispatcher, shard, &addr, &uri).await,
        Route::Local => {
            let shard = dispatcher.current();
            match dispatcher.get_local(key) {
                Ok(Some(value)) => (
                    StatusCode::OK,
                    format!(
                        "Shard: {}, Value: {:?}, Error: <nil>\n",
                        shard,
                        String::from_utf8_lossy(&value)
                    ),
                ),
                Ok(None) => (
                    StatusCode::OK,
                    format!("Shard: {}, Value: <none>, Error: <nil>\n", shard),
                ),
                Err(e) => {
                    tracing::error!("Failed to read key {:?}: {}", query.key, e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Shard: {}, Value: <none>, Error: {}\n", shard, e),
                    )
                }
            }
        }
    }
}

pub async fn handle_set(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<KeyValueQuery>,
) -> (StatusCode, String) {
    let key = query.key.as_bytes();

    if let Err(rejection) = admit(&dispatcher, &headers, key) {
        return rejection;
    }

    match dispatcher.route(key) {
        Route::Remote { shard, addr } => relay(&dispatcher, shard, &addr, &uri).await,
        Route::Local => {
            let shard = dispatcher.current();
            match dispatcher.set_local(key, query.value.as_bytes()) {
                Ok(()) => (
                    StatusCode::OK,
                    format!("Shard: {}, Error: <nil>\n", shard),
                ),
                Err(e) => {
                    let status = match e {
                        StoreError::ReadOnly => StatusCode::FORBIDDEN,
                        StoreError::InvalidUtf8 => StatusCode::BAD_REQUEST,
                        _ => StatusCode::INTERNAL_SERVER_ERROR,
                    };
                    tracing::warn!("Rejected write of key {:?}: {}", query.key, e);
                    (status, format!("Shard: {}, Error: {}\n", shard, e))
                }
            }
        }
    }
}

pub async fn handle_purge(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
) -> (StatusCode, String) {
    match dispatcher.purge().await {
        Ok(removed) => (
            StatusCode::OK,
            format!("Purged: {}, Error: <nil>\n", removed),
        ),
        Err(e) => {
            tracing::error!("Purge failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Purged: 0, Error: {}\n", e),
            )
        }
    }
}

pub async fn handle_next_replication_key(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
) -> (StatusCode, Json<NextEntryResponse>) {
    let response = dispatcher.next_replication_entry();
    let status = match response {
        NextEntryResponse::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(response))
}

pub async fn handle_delete_replication_key(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
    Query(query): Query<KeyValueQuery>,
) -> (StatusCode, String) {
    match dispatcher.ack_replication_entry(query.key.as_bytes(), query.value.as_bytes()) {
        Ok(()) => {
            tracing::debug!("Replica acknowledged key {:?}", query.key);
            (StatusCode::OK, format!("{}\n", ACK_OK))
        }
        Err(e) => {
            let status = match e {
                StoreError::NotFound => StatusCode::NOT_FOUND,
                StoreError::Mismatch => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, format!("error: {}", e))
        }
    }
}

pub async fn handle_stats(
    Extension(dispatcher): Extension<Arc<ShardDispatcher>>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    dispatcher.stats().map(Json).map_err(|e| {
        tracing::error!("Failed to collect stats: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}\n", e))
    })
}

fn admit(
    dispatcher: &ShardDispatcher,
    headers: &HeaderMap,
    key: &[u8],
) -> Result<(), (StatusCode, String)> {
    dispatcher
        .admit(
            header_str(headers, HEADER_FORWARDED_BY),
            header_str(headers, HEADER_TOPOLOGY),
            key,
        )
        .map_err(|rejection| {
            tracing::warn!("Refusing forwarded request: {}", rejection);
            let status = match rejection {
                ForwardRejection::TopologyMismatch { .. } => StatusCode::CONFLICT,
                ForwardRejection::SecondHop { .. } => StatusCode::MISDIRECTED_REQUEST,
            };
            (status, format!("Error: {}\n", rejection))
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn relay(
    dispatcher: &ShardDispatcher,
    shard: ShardId,
    addr: &str,
    uri: &Uri,
) -> (StatusCode, String) {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    match dispatcher.forward(shard, addr, path_and_query).await {
        Ok(response) => (
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY),
            response.body,
        ),
        Err(e) => {
            tracing::error!("Forwarding to shard {} at {} failed: {}", shard, addr, e);
            (
                StatusCode::BAD_GATEWAY,
                format!("Error forwarding the request: {}\n", e),
            )
        }
    }
}
