mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::routing::post;
use clickhouse_http_client::{Client, ClientError, QueryOptions};

use common::serve;

/// Answers with the client's port, or never when asked to sleep.
async fn handler(ConnectInfo(peer): ConnectInfo<SocketAddr>, sql: Bytes) -> String {
    if sql.starts_with(b"SELECT sleep") {
        std::future::pending::<()>().await;
    }
    format!("{}\n", peer.port())
}

async fn peer_port(client: &Client) -> u16 {
    let mut result = client.query("SELECT 1", QueryOptions::new()).await.unwrap();
    result.text().await.unwrap().trim().parse().unwrap()
}

#[tokio::test]
async fn test_saturated_pool_times_out_then_recovers() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::builder(&url).max_open_connections(2).build().unwrap();

    let options = QueryOptions::new().timeout(Duration::from_millis(300));
    let calls = (0..3).map(|_| client.query("SELECT sleep(10)", options.clone()));
    let outcomes = futures::future::join_all(calls).await;

    for outcome in outcomes {
        let err = outcome.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "unexpected {err:?}");
    }
    let status = client.pool_status();
    assert_eq!(status.busy, 0);
    assert_eq!(status.idle, 0);

    // Timed-out channels were closed, not pooled: the next call gets a fresh one.
    peer_port(&client).await;
    assert_eq!(client.pool_status().idle, 1);
}

#[tokio::test]
async fn test_keep_alive_reuses_channel() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::client(&url);

    let first = peer_port(&client).await;
    let second = peer_port(&client).await;
    assert_eq!(first, second);

    let status = client.pool_status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.max_open_connections, 10);
}

#[tokio::test]
async fn test_without_keep_alive_every_call_connects() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::builder(&url).keep_alive(false).build().unwrap();

    let first = peer_port(&client).await;
    let second = peer_port(&client).await;
    assert_ne!(first, second);
    assert_eq!(client.pool_status().idle, 0);
}

#[tokio::test]
async fn test_stale_idle_channel_is_replaced() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::builder(&url)
        .idle_socket_ttl(Duration::from_millis(50))
        .build()
        .unwrap();

    let first = peer_port(&client).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let second = peer_port(&client).await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_close_drops_idle_channels() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::client(&url);

    let first = peer_port(&client).await;
    assert_eq!(client.pool_status().idle, 1);

    client.close();
    assert_eq!(client.pool_status().idle, 0);

    let second = peer_port(&client).await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_dropped_result_frees_slot() {
    let url = serve(Router::new().route("/", post(handler))).await;
    let client = common::builder(&url).max_open_connections(1).build().unwrap();

    let result = client.query("SELECT 1", QueryOptions::new()).await.unwrap();
    assert_eq!(client.pool_status().busy, 1);
    drop(result);
    assert_eq!(client.pool_status().busy, 0);

    // The single slot is usable again.
    peer_port(&client).await;
}
