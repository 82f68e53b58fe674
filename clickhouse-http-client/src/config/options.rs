//! Per-call options.
//!
//! This module provides [`QueryOptions`] for configuring individual calls with
//! a query id, settings, headers, credentials, a timeout and a cancel token.

use std::time::Duration;

use clickhouse_http_core::DataFormat;

use crate::cancel::CancelToken;

/// Username and password sent as HTTP basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options for one call.
///
/// Anything set here wins over the client's configuration for that call.
///
/// # Example
///
/// ```ignore
/// use clickhouse_http_client::{DataFormat, QueryOptions};
/// use std::time::Duration;
///
/// let options = QueryOptions::new()
///     .format(DataFormat::JsonCompactEachRow)
///     .setting("max_result_rows", "1000")
///     .header("x-trace-id", "abc-123")
///     .timeout(Duration::from_secs(5));
///
/// let result = client.query("SELECT number FROM system.numbers LIMIT 10", options).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Must parse as a UUID; generated when absent.
    pub(crate) query_id: Option<String>,
    pub(crate) format: Option<DataFormat>,
    pub(crate) settings: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) session_id: Option<String>,
    pub(crate) roles: Option<Vec<String>>,
    pub(crate) auth: Option<Credentials>,
    pub(crate) cancel_token: Option<CancelToken>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) decompress_response: Option<bool>,
}

impl QueryOptions {
    /// Create new default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the statement under this query id instead of a generated one.
    pub fn query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    /// Output format for `query`. Defaults to `JSONEachRow`.
    pub fn format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Add a server setting for this call.
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.settings, name.into(), value.into());
        self
    }

    /// Add an HTTP header for this call.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.headers, name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add a role to activate for this call. Replaces the client's roles.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.get_or_insert_with(Vec::new).push(role.into());
        self
    }

    /// Authenticate this call with different credentials.
    pub fn auth(mut self, credentials: Credentials) -> Self {
        self.auth = Some(credentials);
        self
    }

    /// Abort the call when `token` fires.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Deadline for the whole call, from slot acquisition to the last body
    /// byte. Overrides the client's request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Leave a gzip response body compressed. Only
    /// [`ResultSet::raw_stream`](crate::ResultSet::raw_stream) can read it then.
    pub fn decompress_response(mut self, decompress: bool) -> Self {
        self.decompress_response = Some(decompress);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The format this call will request.
    pub fn get_format(&self) -> DataFormat {
        self.format.unwrap_or_default()
    }
}

/// Insert or replace `name`, keeping first-insertion order.
pub(crate) fn upsert(pairs: &mut Vec<(String, String)>, name: String, value: String) {
    match pairs.iter_mut().find(|(existing, _)| *existing == name) {
        Some((_, slot)) => *slot = value,
        None => pairs.push((name, value)),
    }
}
