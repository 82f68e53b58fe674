//! Newline splitting with embedded exception detection.
//!
//! [`LineCursor`] is the synchronous heart of row decoding: it is fed chunks
//! in arrival order and hands back complete lines. Between calls it holds
//! only bytes that cannot yet be emitted:
//!
//! - the partial line after the last newline,
//! - at most one complete line ending in `\r`, which may be the first half
//!   of the opening marker `\r\n__exception__\r\n`,
//! - once the opening marker has been seen, every remaining byte (the
//!   exception block).

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use clickhouse_http_core::sentinel::{MARKER_LINE, is_marker_line_prefix, parse_exception_block};
use clickhouse_http_core::TrailingData;

use crate::ClientError;

#[derive(Debug)]
pub(crate) struct LineCursor {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    held: Option<Bytes>,
    exception: Option<BytesMut>,
    trailing: TrailingData,
    tag: Option<String>,
}

impl LineCursor {
    /// `tag` is the expected exception tag, when the server announced one.
    pub(crate) fn new(trailing: TrailingData, tag: Option<String>) -> Self {
        Self {
            pending: BytesMut::new(),
            scanned: 0,
            held: None,
            exception: None,
            trailing,
            tag,
        }
    }

    /// Append `chunk` and move every complete line to `rows`.
    pub(crate) fn push(&mut self, chunk: &[u8], rows: &mut VecDeque<Bytes>) {
        if let Some(block) = self.exception.as_mut() {
            block.extend_from_slice(chunk);
            return;
        }
        self.pending.extend_from_slice(chunk);

        // Each byte is searched once, however many chunks a long row spans.
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline = self.scanned + offset;
            self.scanned = 0;
            let mut line = self.pending.split_to(newline + 1).freeze();
            line.truncate(newline);

            if let Some(held) = self.held.take() {
                if line.as_ref() == MARKER_LINE {
                    // The held line's '\r' opened the marker; whatever preceded
                    // it on that line is a row cut short by the server.
                    if held.len() > 1 {
                        tracing::debug!(
                            dropped = held.len() - 1,
                            "discarding partial row before exception block"
                        );
                    }
                    tracing::debug!("embedded exception block detected");
                    self.exception = Some(std::mem::take(&mut self.pending));
                    return;
                }
                rows.push_back(held);
            }

            if line.ends_with(b"\r") {
                self.held = Some(line);
            } else {
                rows.push_back(line);
            }
        }
        self.scanned = self.pending.len();
    }

    /// Flush what is left at end of stream.
    ///
    /// Rows released here are pushed before any error is returned, so rows
    /// that were valid stay valid.
    pub(crate) fn finish(&mut self, rows: &mut VecDeque<Bytes>) -> Result<(), ClientError> {
        if let Some(block) = self.exception.take() {
            return Err(match parse_exception_block(&block, self.tag.as_deref()) {
                Ok(message) => {
                    tracing::debug!(message = %message, "stream ended with an exception");
                    ClientError::StreamException {
                        message,
                        query_id: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "malformed exception block");
                    err.into()
                }
            });
        }

        self.scanned = 0;
        let tail = std::mem::take(&mut self.pending).freeze();
        match self.held.take() {
            Some(held) => {
                // "\r\n" then a prefix of "__exception__\r", or "\r\n" alone.
                if is_marker_line_prefix(&tail) || (held.as_ref() == b"\r" && tail.is_empty()) {
                    return Err(truncated());
                }
                rows.push_back(held);
            }
            None if tail.as_ref() == b"\r" => return Err(truncated()),
            None => {}
        }

        if tail.is_empty() {
            return Ok(());
        }
        match self.trailing {
            TrailingData::Row => {
                rows.push_back(tail);
                Ok(())
            }
            TrailingData::Reject => Err(ClientError::stream_protocol(format!(
                "stream ended with {} bytes of unterminated data",
                tail.len()
            ))),
        }
    }
}

fn truncated() -> ClientError {
    tracing::warn!("stream ended inside an exception marker");
    ClientError::stream_protocol("exception block is truncated")
}

/// Run a complete body through a cursor, keeping only the verdict.
pub(crate) fn check_body(
    body: &[u8],
    trailing: TrailingData,
    tag: Option<String>,
) -> Result<(), ClientError> {
    let mut cursor = LineCursor::new(trailing, tag);
    let mut rows = VecDeque::new();
    cursor.push(body, &mut rows);
    rows.clear();
    cursor.finish(&mut rows)
}
