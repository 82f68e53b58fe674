//! Driver error kinds and sentinel framing errors.
//!
//! This module provides the core error types shared by the driver:
//! - [`ErrorKind`]: The closed failure taxonomy
//! - [`SentinelError`]: Malformed embedded exception framing

use serde::Serialize;

/// The kind of failure a request settled with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No channel could be obtained (refused, unreachable, TLS handshake).
    Connection,
    /// The request deadline elapsed at some suspension point.
    Timeout,
    /// The caller's cancel token fired.
    Cancelled,
    /// The server answered with an error status.
    Server,
    /// A malformed or partial exception block was found at the end of a stream.
    StreamProtocol,
    /// A well-formed exception block was found at the end of a stream.
    StreamException,
    /// A payload did not conform to the requested structured form.
    Decode,
    /// The request could not be assembled.
    InvalidRequest,
    /// The response body was already taken by another accessor.
    AlreadyConsumed,
    /// I/O failed on an established channel.
    Transport,
}

impl ErrorKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Server => "server",
            ErrorKind::StreamProtocol => "stream_protocol",
            ErrorKind::StreamException => "stream_exception",
            ErrorKind::Decode => "decode",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AlreadyConsumed => "already_consumed",
            ErrorKind::Transport => "transport",
        }
    }

    /// Returns whether a channel that saw this failure may go back to the pool.
    ///
    /// Only a clean server error response leaves the channel at a known read
    /// position: its whole body has been read as the error message.
    ///
    /// ```
    /// use clickhouse_http_core::ErrorKind;
    ///
    /// assert!(ErrorKind::Server.keeps_channel());
    /// assert!(!ErrorKind::Timeout.keeps_channel());
    /// assert!(!ErrorKind::StreamException.keeps_channel());
    /// ```
    pub fn keeps_channel(&self) -> bool {
        matches!(self, ErrorKind::Server)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors found while parsing an embedded exception block.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SentinelError {
    /// The block does not end with the closing marker.
    #[error("exception block is missing its closing marker")]
    MissingClosingMarker,

    /// The tag line or the trailing tag is absent.
    #[error("exception block is missing its tag")]
    MissingTag,

    /// The two tags in the block differ, or differ from the expected one.
    #[error("exception tag mismatch: expected {expected:?}, found {found:?}")]
    TagMismatch { expected: String, found: String },

    /// The length field is absent or not a decimal number.
    #[error("exception block has an invalid length field")]
    InvalidLength,

    /// The length field does not match the message.
    #[error("exception length {declared} does not match message length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The stream ended partway through the block.
    #[error("exception block is truncated")]
    Truncated,
}
