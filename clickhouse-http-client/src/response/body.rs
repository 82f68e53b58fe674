//! The success-path response body as a byte stream.

use bytes::Bytes;
use clickhouse_http_core::GzipStreamDecoder;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tracing::Instrument;

use crate::cancel::{CallGuard, Stage};
use crate::transport::{BodyStream, Lease};
use crate::ClientError;

struct BodyState {
    incoming: Incoming,
    guard: CallGuard,
    lease: Option<Lease>,
    gunzip: Option<GzipStreamDecoder>,
    span: tracing::Span,
}

impl BodyState {
    fn fail(&mut self, err: ClientError) -> ClientError {
        if let Some(lease) = self.lease.take() {
            lease.fail(&err);
        }
        err
    }
}

/// Stream `incoming` chunk by chunk.
///
/// Every read waits through `guard`, so the call's deadline and cancel token
/// cover reads made long after the response head arrived. The lease is
/// released once the last byte is read and invalidated on any error. Dropping
/// the stream early drops the lease, which closes the channel.
pub(crate) fn body_stream(
    incoming: Incoming,
    lease: Lease,
    guard: CallGuard,
    gunzip: bool,
    span: tracing::Span,
) -> BodyStream {
    let state = BodyState {
        incoming,
        guard,
        lease: Some(lease),
        gunzip: gunzip.then(GzipStreamDecoder::new),
        span,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            // No lease: the body already ended or failed.
            state.lease.as_ref()?;

            let BodyState {
                incoming,
                guard,
                span,
                ..
            } = &mut state;
            let frame = guard
                .run(Stage::Receive, async {
                    match incoming.frame().await {
                        None => Ok(None),
                        Some(Ok(frame)) => Ok(Some(frame)),
                        Some(Err(err)) => Err(ClientError::Transport(format!(
                            "failed to read response body: {err}"
                        ))),
                    }
                })
                .instrument(span.clone())
                .await;

            match frame {
                Ok(Some(frame)) => {
                    // Trailers carry nothing for us.
                    let Ok(data) = frame.into_data() else {
                        continue;
                    };
                    let Some(gunzip) = state.gunzip.as_mut() else {
                        return Some((Ok(data), state));
                    };
                    match gunzip.push(&data) {
                        Ok(out) if out.is_empty() => continue,
                        Ok(out) => return Some((Ok(out), state)),
                        Err(err) => {
                            let err = state.fail(decompress_error(err));
                            return Some((Err(err), state));
                        }
                    }
                }
                Ok(None) => {
                    let tail = match state.gunzip.take().map(GzipStreamDecoder::finish) {
                        Some(Ok(tail)) => tail,
                        Some(Err(err)) => {
                            let err = state.fail(decompress_error(err));
                            return Some((Err(err), state));
                        }
                        None => Bytes::new(),
                    };
                    if let Some(lease) = state.lease.take() {
                        lease.release();
                    }
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), state));
                }
                Err(err) => {
                    let err = state.fail(err);
                    return Some((Err(err), state));
                }
            }
        }
    }))
}

fn decompress_error(err: std::io::Error) -> ClientError {
    ClientError::Transport(format!("failed to decompress response body: {err}"))
}
