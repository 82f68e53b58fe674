//! ClickHouse HTTP client.
//!
//! This module provides the main [`Client`] type for running statements.

use std::sync::Arc;

use clickhouse_http_core::{DataFormat, TrailingData};
use http::Uri;
use tracing::Instrument;

use crate::builder::{ClientBuildError, ClientBuilder};
use crate::cancel::{CallGuard, Stage};
use crate::config::{ClientConfig, QueryOptions};
use crate::request::{build_ping, build_statement};
use crate::response::{
    Classified, CommandResult, ExecResult, ResultSet, check_body, classify, read_all,
};
use crate::transport::{ChannelPool, Connector, PoolConfig, PoolStatus, TransportBody};
use crate::ClientError;

/// ClickHouse HTTP client.
///
/// Cheap to clone; clones share one connection pool. Use [`ClientBuilder`]
/// or [`Client::builder`] to create an instance.
///
/// # Example
///
/// ```ignore
/// use clickhouse_http_client::{Client, QueryOptions};
/// use futures::StreamExt;
///
/// let client = Client::builder().url("http://localhost:8123").build()?;
///
/// let mut result = client
///     .query("SELECT number FROM system.numbers LIMIT 3", QueryOptions::new())
///     .await?;
/// let mut rows = result.stream()?;
/// while let Some(row) = rows.next().await {
///     println!("{}", row?.text()?);
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    pool: ChannelPool,
}

impl Client {
    /// Create a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a new client. Called by [`ClientBuilder::build`].
    pub(crate) fn new(config: ClientConfig, connector: Connector) -> Result<Self, ClientBuildError> {
        let target: Uri = config
            .url
            .origin()
            .ascii_serialization()
            .parse()
            .map_err(|err| ClientBuildError::InvalidUrl(format!("{}: {err}", config.url)))?;
        let pool = ChannelPool::new(
            connector,
            target,
            PoolConfig {
                max_open_connections: config.max_open_connections,
                keep_alive: config.keep_alive,
                idle_socket_ttl: config.idle_socket_ttl,
            },
        );
        Ok(Self {
            inner: Arc::new(ClientInner { config, pool }),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Run a statement that returns rows.
    ///
    /// Returns once the response head arrived; the rows are read from the
    /// [`ResultSet`]. The call's deadline keeps running while they are read.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]. A non-2xx status is [`ClientError::Server`].
    pub async fn query(&self, sql: &str, options: QueryOptions) -> Result<ResultSet, ClientError> {
        let format = options.get_format();
        let classified = self.execute("query", sql, None, Some(format), &options).await?;
        Ok(ResultSet::new(classified, format))
    }

    /// Run a statement without rows (DDL, `SET`, `INSERT ... SELECT`).
    ///
    /// The response body is read to the end and discarded, so the channel is
    /// back in the pool when this returns.
    pub async fn command(&self, sql: &str, options: QueryOptions) -> Result<CommandResult, ClientError> {
        let classified = self.execute("command", sql, None, options.format, &options).await?;
        let meta = classified.meta;
        let tag = meta.exception_tag().map(str::to_string);
        let body = read_all(classified.body).await?;
        if !classified.compressed {
            check_body(&body, TrailingData::Row, tag)
                .map_err(|err| err.with_query_id(meta.query_id()))?;
        }
        Ok(CommandResult::new(meta))
    }

    /// Run any statement, optionally sending `body` as the request payload.
    ///
    /// With a body (e.g. rows for `INSERT INTO t FORMAT JSONEachRow`) the
    /// statement travels in the `query` URL parameter. The response body is
    /// returned unread.
    pub async fn exec(
        &self,
        sql: &str,
        body: Option<TransportBody>,
        options: QueryOptions,
    ) -> Result<ExecResult, ClientError> {
        let classified = self.execute("exec", sql, body, options.format, &options).await?;
        Ok(ExecResult::new(classified))
    }

    /// Check that the server answers `GET /ping`.
    ///
    /// Returns `Ok(false)` when the server answers with an error status;
    /// failing to reach it at all is an error.
    pub async fn ping(&self) -> Result<bool, ClientError> {
        let span = tracing::info_span!("clickhouse.ping", channel = tracing::field::Empty);
        let request = build_ping(&self.inner.config)?;
        let guard = CallGuard::new(Some(self.inner.config.request_timeout), None);

        let outcome = self
            .dispatch(request, &guard, "", true, span.clone())
            .instrument(span)
            .await;
        match outcome {
            Ok(classified) => {
                read_all(classified.body).await?;
                Ok(true)
            }
            Err(ClientError::Server { status, .. }) => {
                tracing::debug!(status, "ping answered with an error status");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Close every idle connection.
    ///
    /// Calls in flight keep their connections. The client stays usable;
    /// later calls open fresh connections.
    pub fn close(&self) {
        self.inner.pool.close_idle();
    }

    /// A snapshot of the connection pool.
    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    async fn execute(
        &self,
        method: &'static str,
        sql: &str,
        body: Option<TransportBody>,
        format: Option<DataFormat>,
        options: &QueryOptions,
    ) -> Result<Classified, ClientError> {
        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let guard = CallGuard::new(Some(timeout), options.cancel_token.clone());
        // A call cancelled before it starts never touches the wire.
        guard.check(Stage::Acquire)?;

        let prepared = build_statement(&self.inner.config, sql, body, format, options)?;
        let span = tracing::info_span!(
            "clickhouse.request",
            method = method,
            query_id = %prepared.query_id,
            channel = tracing::field::Empty,
        );
        let decompress = options.decompress_response.unwrap_or(true);

        let result = self
            .dispatch(prepared.request, &guard, &prepared.query_id, decompress, span.clone())
            .instrument(span.clone())
            .await;
        if let Err(err) = &result {
            span.in_scope(|| tracing::debug!(error = %err, kind = ?err.kind(), "request failed"));
        }
        result
    }

    /// Acquire a channel, send `request` and classify the response head.
    async fn dispatch(
        &self,
        request: http::Request<TransportBody>,
        guard: &CallGuard,
        query_id: &str,
        decompress: bool,
        span: tracing::Span,
    ) -> Result<Classified, ClientError> {
        let mut lease = guard
            .run(Stage::Acquire, self.inner.pool.acquire(guard.remaining()))
            .await?;
        if let Some(channel) = lease.channel_id() {
            span.record("channel", channel);
        }

        let sent = guard.run(Stage::Send, lease.send(request)).await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                lease.fail(&err);
                return Err(err);
            }
        };
        tracing::debug!(status = response.status().as_u16(), "response head received");

        classify(response, lease, guard.clone(), query_id, decompress, span).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url.as_str())
            .field("database", &self.inner.config.database)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancelToken;

    #[tokio::test]
    async fn test_pre_cancelled_call_never_acquires() {
        let client = Client::builder()
            .url("http://127.0.0.1:1")
            .build()
            .unwrap();
        let token = CancelToken::new();
        token.cancel();

        let err = client
            .query("SELECT 1", QueryOptions::new().cancel_token(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(client.pool_status().busy, 0);
        assert_eq!(client.pool_status().idle, 0);
    }

    #[tokio::test]
    async fn test_invalid_query_id_fails_before_connecting() {
        let client = Client::builder()
            .url("http://127.0.0.1:1")
            .build()
            .unwrap();
        let err = client
            .command("SELECT 1", QueryOptions::new().query_id("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let client = Client::builder()
            .url("http://127.0.0.1:1")
            .build()
            .unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert_eq!(client.pool_status().empty, client.config().max_open_connections);
    }
}
