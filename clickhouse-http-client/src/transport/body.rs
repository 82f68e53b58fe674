//! Request body types for HTTP transport.
//!
//! [`TransportBody`] is the body of every outbound request: empty for pings,
//! a full buffer for query text, or a caller-supplied stream for `exec`
//! uploads. Streams can be gzipped on the fly with [`TransportBody::gzip_streaming`].

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use clickhouse_http_core::GzipStreamEncoder;
use futures::{Stream, StreamExt};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;

use crate::ClientError;

/// A boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

pin_project! {
    /// An outbound request body.
    #[project = TransportBodyProj]
    pub enum TransportBody {
        /// No body.
        Empty,
        /// The whole body is known up front.
        Full {
            data: Option<Bytes>,
        },
        /// The body is produced incrementally.
        Streaming {
            #[pin]
            stream: BodyStream,
        },
    }
}

impl TransportBody {
    /// Create an empty body.
    pub fn empty() -> Self {
        TransportBody::Empty
    }

    /// Create a body with the given data.
    pub fn full(data: impl Into<Bytes>) -> Self {
        TransportBody::Full {
            data: Some(data.into()),
        }
    }

    /// Create a streaming body from the given stream.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        TransportBody::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// Gzip `stream` chunk by chunk as it is sent.
    ///
    /// Compressed output is only yielded when the encoder flushes a block, so
    /// small inputs typically arrive as one chunk at the end.
    pub fn gzip_streaming<S>(stream: S, level: u32) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        let state = (Box::pin(stream), Some(GzipStreamEncoder::new(level)));
        let compressed = futures::stream::unfold(state, |(mut input, mut encoder)| async move {
            loop {
                let active = encoder.as_mut()?;
                match input.next().await {
                    Some(Ok(chunk)) => match active.push(&chunk) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Some((Ok(out), (input, encoder))),
                        Err(err) => return Some((Err(gzip_error(err)), (input, None))),
                    },
                    Some(Err(err)) => return Some((Err(err), (input, None))),
                    None => {
                        let finished = encoder.take()?;
                        return match finished.finish() {
                            Ok(out) => Some((Ok(out), (input, None))),
                            Err(err) => Some((Err(gzip_error(err)), (input, None))),
                        };
                    }
                }
            }
        });
        TransportBody::streaming(compressed)
    }
}

fn gzip_error(err: std::io::Error) -> ClientError {
    ClientError::InvalidRequest(format!("failed to compress request body: {err}"))
}

impl Body for TransportBody {
    type Data = Bytes;
    type Error = ClientError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            TransportBodyProj::Empty => Poll::Ready(None),
            TransportBodyProj::Full { data } => Poll::Ready(data.take().map(|d| Ok(Frame::data(d)))),
            TransportBodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            TransportBody::Empty => true,
            TransportBody::Full { data } => data.is_none(),
            TransportBody::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            TransportBody::Empty => http_body::SizeHint::with_exact(0),
            TransportBody::Full { data } => {
                http_body::SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            TransportBody::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for TransportBody {
    fn default() -> Self {
        TransportBody::Empty
    }
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportBody::Empty => write!(f, "TransportBody::Empty"),
            TransportBody::Full { data } => f
                .debug_struct("TransportBody::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            TransportBody::Streaming { .. } => write!(f, "TransportBody::Streaming"),
        }
    }
}
