//! Streaming ClickHouse client over the HTTP interface.
//!
//! This crate runs SQL statements against a ClickHouse server's HTTP port
//! and streams the results back row by row, through a bounded pool of
//! keep-alive connections.
//!
//! ## Features
//!
//! - Row-by-row streaming of one-row-per-line formats (`JSONEachRow`, CSV, ...)
//! - Whole-body reads as text or deserialized JSON
//! - Detection of exceptions the server appends to an already-started body
//! - One deadline per call covering connection wait, send and every body read
//! - Cooperative cancellation with [`CancelToken`]
//! - Gzip request and response compression
//! - Configuration from a URL, builder methods and per-call options
//!
//! ## Example
//!
//! ```ignore
//! use clickhouse_http_client::{Client, DataFormat, QueryOptions};
//! use futures::StreamExt;
//!
//! let client = Client::builder()
//!     .url("http://default@localhost:8123?database=system")
//!     .build()?;
//!
//! let mut result = client
//!     .query(
//!         "SELECT name, engine FROM tables LIMIT 5",
//!         QueryOptions::new().format(DataFormat::JsonEachRow),
//!     )
//!     .await?;
//!
//! let mut rows = result.stream()?;
//! while let Some(row) = rows.next().await {
//!     let row = row?;
//!     println!("{}", row.value()?["name"]);
//! }
//! ```
//!
//! ## Errors in the middle of a stream
//!
//! Once the server has sent `200 OK` and some rows, a failure can no longer
//! change the status. The server appends an exception block to the body
//! instead. The row stream yields every row before the block, then a
//! [`ClientError::StreamException`] carrying the server's message. A block
//! cut short by a dropped connection is a [`ClientError::StreamProtocol`].
//!
//! ## Cancellation and Timeouts
//!
//! ```ignore
//! use clickhouse_http_client::{CancelToken, QueryOptions};
//! use std::time::Duration;
//!
//! let token = CancelToken::new();
//! let options = QueryOptions::new()
//!     .cancel_token(token.clone())
//!     .timeout(Duration::from_secs(5));
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     token.cancel();
//! });
//!
//! let err = client.query("SELECT sleep(3)", options).await.unwrap_err();
//! assert!(err.is_cancelled());
//! ```
//!
//! A cancelled or timed-out call closes its connection; the pool opens a
//! fresh one for the next call. The driver never retries.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tls` (default) | `tls-ring` + `tls-native-roots` |
//! | `tls-ring` / `tls-aws-lc` | rustls crypto provider |
//! | `tls-native-roots` / `tls-webpki-roots` | root certificates |

mod builder;
mod cancel;
mod client;
pub mod config;
mod error;
mod request;
pub mod response;
pub mod transport;

pub use builder::{ClientBuildError, ClientBuilder};
pub use cancel::CancelToken;
pub use client::Client;
pub use config::{ClientConfig, Credentials, QueryOptions};
pub use error::ClientError;
pub use response::{
    CommandResult, ExecResult, QuerySummary, ResponseMeta, ResultSet, Row, RowDecoder, RowStream,
};
pub use transport::{BodyStream, PoolStatus, TransportBody};

// Re-export core types
pub use clickhouse_http_core::{CompressionLevel, DataFormat, ErrorKind, FormatKind};
