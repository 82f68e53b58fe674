//! Client-side error types.
//!
//! This module provides [`ClientError`], the error type for every driver operation.

use clickhouse_http_core::{ErrorKind, SentinelError};

/// Errors a request can settle with.
///
/// Each variant maps to exactly one [`ErrorKind`]. None of them is retried by
/// the driver; retry policy belongs to the caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// No channel could be obtained (refused, unreachable, TLS handshake).
    #[error("connection error: {0}")]
    Connection(String),

    /// The request deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The caller's cancel token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The server answered with an error status; `message` is the full body.
    #[error("server error (HTTP {status}): {message}")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
        query_id: Option<String>,
    },

    /// A partial or malformed exception block ended the stream.
    #[error("error in the stream: {message}")]
    StreamProtocol {
        message: String,
        query_id: Option<String>,
    },

    /// The server appended a well-formed exception block after sending rows.
    #[error("{message}")]
    StreamException {
        message: String,
        query_id: Option<String>,
    },

    /// A payload does not conform to the requested structured form.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request could not be assembled.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body was already taken by another accessor.
    #[error("response body already consumed")]
    AlreadyConsumed,

    /// I/O failed on an established channel.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(_) => ErrorKind::Connection,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Server { .. } => ErrorKind::Server,
            ClientError::StreamProtocol { .. } => ErrorKind::StreamProtocol,
            ClientError::StreamException { .. } => ErrorKind::StreamException,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ClientError::AlreadyConsumed => ErrorKind::AlreadyConsumed,
            ClientError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Get the error message, if the variant carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Server { message, .. }
            | ClientError::StreamProtocol { message, .. }
            | ClientError::StreamException { message, .. } => Some(message),
            ClientError::Connection(msg)
            | ClientError::Timeout(msg)
            | ClientError::Decode(msg)
            | ClientError::InvalidRequest(msg)
            | ClientError::Transport(msg) => Some(msg),
            ClientError::Cancelled | ClientError::AlreadyConsumed => None,
        }
    }

    /// The server's exception code, for error responses that announced one.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The id of the query the server or the stream failed for.
    ///
    /// Known for server errors and for errors found at the end of a result
    /// stream; `None` for everything else and for `ping`.
    pub fn query_id(&self) -> Option<&str> {
        match self {
            ClientError::Server { query_id, .. }
            | ClientError::StreamProtocol { query_id, .. }
            | ClientError::StreamException { query_id, .. } => query_id.as_deref(),
            _ => None,
        }
    }

    /// Tag a server or stream error with the query it belongs to, unless it
    /// already carries an id. Other variants pass through unchanged.
    pub(crate) fn with_query_id(mut self, id: &str) -> Self {
        if let ClientError::Server { query_id, .. }
        | ClientError::StreamProtocol { query_id, .. }
        | ClientError::StreamException { query_id, .. } = &mut self
        {
            if query_id.is_none() && !id.is_empty() {
                *query_id = Some(id.to_string());
            }
        }
        self
    }

    pub(crate) fn stream_protocol(message: impl Into<String>) -> Self {
        ClientError::StreamProtocol {
            message: message.into(),
            query_id: None,
        }
    }

    /// Returns true for timeout failures.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout(_))
    }

    /// Returns true for cancellation failures.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<SentinelError> for ClientError {
    fn from(err: SentinelError) -> Self {
        ClientError::stream_protocol(err.to_string())
    }
}
