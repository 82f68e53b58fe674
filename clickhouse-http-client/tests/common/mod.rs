//! In-process mock of the ClickHouse HTTP interface.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use clickhouse_http_client::{Client, ClientBuilder};
use futures::Stream;
use tokio::net::TcpListener;

pub const TAG: &str = "mocktag0123456789";

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}

/// A builder pointed at `url` with response compression off, so handlers can
/// answer in plain text unless a test asks otherwise.
pub fn builder(url: &str) -> ClientBuilder {
    Client::builder().url(url).compress_response(false)
}

pub fn client(url: &str) -> Client {
    builder(url).build().unwrap()
}

/// A chunked body yielding `chunks` with `pause` between them.
pub fn chunked(chunks: Vec<Vec<u8>>, pause: Duration) -> Body {
    Body::from_stream(paced(chunks, pause))
}

fn paced(
    chunks: Vec<Vec<u8>>,
    pause: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        for (index, chunk) in chunks.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(pause).await;
            }
            yield Ok(Bytes::from(chunk));
        }
    }
}

/// A body that sends `first` and then never finishes.
pub fn stalled(first: &'static [u8]) -> Body {
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Bytes::from_static(first));
        std::future::pending::<()>().await;
    };
    Body::from_stream(stream)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
