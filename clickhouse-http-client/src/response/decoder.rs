//! Streaming row decoding.
//!
//! This module provides [`RowDecoder`]: a stream adapter that splits a byte
//! stream into newline-delimited [`Row`]s and turns an embedded exception
//! block at the end of the body into an error.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use clickhouse_http_core::FormatKind;
use futures::Stream;

use super::cursor::LineCursor;
use super::row::Row;
use crate::ClientError;

/// Stream adapter that yields rows from a byte stream.
///
/// Rows are yielded in the order their newlines arrive, however the bytes
/// are chunked. When the body ends with an exception block, every row before
/// it is yielded first and the stream then ends with
/// [`ClientError::StreamException`] (or [`ClientError::StreamProtocol`] if
/// the block is malformed or cut short).
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut rows = result.stream()?;
/// while let Some(row) = rows.next().await {
///     let row = row?;
///     println!("{}", row.text()?);
/// }
/// ```
pub struct RowDecoder<S> {
    /// The underlying byte stream.
    stream: S,
    /// Line splitting state carried across chunks.
    cursor: LineCursor,
    /// Lines split off but not yet yielded.
    rows: VecDeque<Bytes>,
    kind: FormatKind,
    /// Error to yield once `rows` is drained.
    error: Option<ClientError>,
    finished: bool,
    /// Attached to stream errors.
    query_id: Option<String>,
}

impl<S> RowDecoder<S> {
    /// Create a decoder for rows of `kind`, expecting exception blocks tagged `tag`.
    pub fn new(stream: S, kind: FormatKind, tag: Option<String>) -> Self {
        Self {
            stream,
            cursor: LineCursor::new(kind.trailing_data(), tag),
            rows: VecDeque::new(),
            kind,
            error: None,
            finished: false,
            query_id: None,
        }
    }

    /// Tag errors found at the end of the stream with `query_id`.
    pub(crate) fn with_query_id(mut self, query_id: &str) -> Self {
        self.query_id = Some(query_id.to_string());
        self
    }

    fn fail(&mut self, err: ClientError) {
        self.error = Some(match &self.query_id {
            Some(id) => err.with_query_id(id),
            None => err,
        });
    }

    /// Check if the underlying stream has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<S> Unpin for RowDecoder<S> where S: Unpin {}

impl<S> Stream for RowDecoder<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    type Item = Result<Row, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(line) = this.rows.pop_front() {
                return Poll::Ready(Some(Ok(Row::new(line, this.kind))));
            }

            if let Some(err) = this.error.take() {
                return Poll::Ready(Some(Err(err)));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.cursor.push(&chunk, &mut this.rows);
                }
                Poll::Ready(Some(Err(e))) => {
                    // Bytes already split off stay valid; nothing buffered is flushed.
                    this.finished = true;
                    this.fail(e);
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if let Err(e) = this.cursor.finish(&mut this.rows) {
                        this.fail(e);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clickhouse_http_core::sentinel::encode_exception_block;
    use futures::StreamExt;
    use futures::stream;

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, ClientError>> + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    #[tokio::test]
    async fn test_rows_in_order() {
        let decoder = RowDecoder::new(
            chunks(vec![b"{\"number\":\"0\"}\n{\"num".as_slice(), b"ber\":\"1\"}\n".as_slice()]),
            FormatKind::StreamableJson,
            None,
        );
        let rows: Vec<_> = decoder.collect().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_ref().unwrap().text().unwrap(), "{\"number\":\"0\"}");
        assert_eq!(rows[1].as_ref().unwrap().value().unwrap()["number"], "1");
    }

    #[tokio::test]
    async fn test_rows_then_stream_exception() {
        let block: &'static [u8] = Box::leak(encode_exception_block("T", "boom").into_boxed_slice());
        let mut decoder = RowDecoder::new(
            chunks(vec![b"1\n2\n".as_slice(), &block[..5], &block[5..]]),
            FormatKind::Raw,
            Some("T".into()),
        );

        assert_eq!(decoder.next().await.unwrap().unwrap().text().unwrap(), "1");
        assert_eq!(decoder.next().await.unwrap().unwrap().text().unwrap(), "2");
        let err = decoder.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::StreamException { ref message, .. } if message == "boom"));
        assert_eq!(err.query_id(), None);
        assert!(decoder.next().await.is_none());
        assert!(decoder.is_finished());
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let parts = vec![
            Ok(Bytes::from_static(b"1\n2")),
            Err(ClientError::Cancelled),
        ];
        let mut decoder = RowDecoder::new(stream::iter(parts), FormatKind::Raw, None);

        assert_eq!(decoder.next().await.unwrap().unwrap().text().unwrap(), "1");
        assert!(decoder.next().await.unwrap().unwrap_err().is_cancelled());
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_errors_carry_query_id() {
        let block: &'static [u8] = Box::leak(encode_exception_block("T", "boom").into_boxed_slice());
        let id = "5a0c7f0e-33b1-4d8e-8f5e-0c1d2e3f4a5b";
        let mut decoder = RowDecoder::new(
            chunks(vec![b"1\n".as_slice(), block]),
            FormatKind::Raw,
            Some("T".into()),
        )
        .with_query_id(id);

        assert!(decoder.next().await.unwrap().is_ok());
        let err = decoder.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), clickhouse_http_core::ErrorKind::StreamException);
        assert_eq!(err.query_id(), Some(id));
    }

    #[tokio::test]
    async fn test_unterminated_json_tail_is_rejected() {
        let mut decoder = RowDecoder::new(
            chunks(vec![b"{\"a\":1}\n{\"a\":2}".as_slice()]),
            FormatKind::StreamableJson,
            None,
        );
        assert!(decoder.next().await.unwrap().is_ok());
        let err = decoder.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::StreamProtocol { .. }));
    }
}
