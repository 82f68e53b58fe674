//! Response classification.

use bytes::Bytes;
use clickhouse_http_core::{Codec, CompressionEncoding, GzipCodec};
use http::header::CONTENT_ENCODING;
use http::Response;
use http_body_util::BodyExt;
use hyper::body::Incoming;

use super::body::body_stream;
use super::{EXCEPTION_CODE_HEADER, QUERY_ID_HEADER, ResponseMeta, header_str};
use crate::cancel::{CallGuard, Stage};
use crate::transport::{BodyStream, Lease};
use crate::ClientError;

/// A success response whose body is still being read.
pub(crate) struct Classified {
    pub(crate) meta: ResponseMeta,
    pub(crate) body: BodyStream,
    /// The body is still gzip-compressed.
    pub(crate) compressed: bool,
}

/// Route a response head to the error or the success path.
///
/// An error status always has its whole body read (through `guard`) and
/// decompressed, whatever `decompress` says, and becomes
/// [`ClientError::Server`] carrying the query id; the channel goes back to
/// the pool because the exchange completed cleanly. A success status hands the open body on,
/// decompressed on the fly when `decompress` is set and the server used gzip.
pub(crate) async fn classify(
    response: Response<Incoming>,
    lease: Lease,
    guard: CallGuard,
    request_query_id: &str,
    decompress: bool,
    span: tracing::Span,
) -> Result<Classified, ClientError> {
    let (parts, incoming) = response.into_parts();
    let encoding = header_str(&parts.headers, CONTENT_ENCODING.as_str());
    let gzip = match CompressionEncoding::from_header(encoding) {
        Some(CompressionEncoding::Gzip) => true,
        Some(CompressionEncoding::Identity) => false,
        None => {
            let err = ClientError::Transport(format!(
                "unsupported response content-encoding: {}",
                encoding.unwrap_or_default()
            ));
            lease.fail(&err);
            return Err(err);
        }
    };

    if !parts.status.is_success() {
        let status = parts.status.as_u16();
        let code = header_str(&parts.headers, EXCEPTION_CODE_HEADER).map(str::to_string);
        let query_id = header_str(&parts.headers, QUERY_ID_HEADER)
            .unwrap_or(request_query_id)
            .to_string();
        let body = guard
            .run(Stage::Receive, async {
                incoming
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes())
                    .map_err(|err| {
                        ClientError::Transport(format!("failed to read error response: {err}"))
                    })
            })
            .await;
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                lease.fail(&err);
                return Err(err);
            }
        };

        tracing::debug!(status, code = code.as_deref(), "server returned an error");
        let err = ClientError::Server {
            status,
            code,
            message: error_message(body, gzip),
            query_id: (!query_id.is_empty()).then_some(query_id),
        };
        lease.fail(&err);
        return Err(err);
    }

    let meta = ResponseMeta::from_headers(parts.headers, request_query_id);
    let gunzip = gzip && decompress;
    Ok(Classified {
        meta,
        body: body_stream(incoming, lease, guard, gunzip, span),
        compressed: gzip && !decompress,
    })
}

fn error_message(body: Bytes, gzip: bool) -> String {
    let plain = if gzip {
        // A body that claims gzip but is not still says something useful.
        GzipCodec::default().decompress(&body).unwrap_or(body)
    } else {
        body
    };
    String::from_utf8_lossy(&plain).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_is_decompressed() {
        let message = "Code: 60. DB::Exception: Table default.nope does not exist.\n";
        let compressed = GzipCodec::default().compress(message.as_bytes()).unwrap();
        assert_eq!(error_message(compressed, true), message);
    }

    #[test]
    fn test_error_message_falls_back_to_raw_body() {
        assert_eq!(error_message(Bytes::from("plain text"), true), "plain text");
        assert_eq!(error_message(Bytes::from("plain text"), false), "plain text");
    }
}
