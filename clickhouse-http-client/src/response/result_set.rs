//! Results handed back to callers.

use bytes::{Bytes, BytesMut};
use clickhouse_http_core::{DataFormat, FormatKind, TrailingData};
use futures::StreamExt;
use http::HeaderMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::classifier::Classified;
use super::cursor::check_body;
use super::decoder::RowDecoder;
use super::{QuerySummary, ResponseMeta};
use crate::transport::BodyStream;
use crate::ClientError;

/// Rows of a streamed result.
pub type RowStream = RowDecoder<BodyStream>;

enum Body {
    /// Nothing has been read yet.
    Pending(BodyStream),
    /// Read in full by a whole-body accessor.
    Collected {
        bytes: Bytes,
        value: Option<serde_json::Value>,
    },
    /// Handed out as a stream.
    Streamed,
    /// A whole-body read failed; later reads report the same failure.
    Failed(ClientError),
}

/// The result of [`Client::query`](crate::Client::query).
///
/// The body can be read once, either as a stream ([`stream`](Self::stream),
/// [`raw_stream`](Self::raw_stream)) or as a whole ([`text`](Self::text),
/// [`json`](Self::json), [`value`](Self::value)). The whole-body accessors
/// may be called repeatedly; mixing the two styles fails with
/// [`ClientError::AlreadyConsumed`]. Once a whole-body read has failed,
/// every later read returns that same error.
///
/// The call's connection slot stays taken until the body is read to the end
/// or the result is dropped.
pub struct ResultSet {
    meta: ResponseMeta,
    format: DataFormat,
    compressed: bool,
    body: Body,
}

impl ResultSet {
    pub(crate) fn new(classified: Classified, format: DataFormat) -> Self {
        Self {
            meta: classified.meta,
            format,
            compressed: classified.compressed,
            body: Body::Pending(classified.body),
        }
    }

    /// The query id the server ran the statement under.
    pub fn query_id(&self) -> &str {
        self.meta.query_id()
    }

    /// Progress counters from `X-ClickHouse-Summary`.
    pub fn summary(&self) -> Option<&QuerySummary> {
        self.meta.summary()
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        self.meta.headers()
    }

    /// Response metadata.
    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// The format the rows are in.
    pub fn format(&self) -> DataFormat {
        self.format
    }

    /// Stream the body row by row.
    ///
    /// Only formats with one row per line can be streamed.
    pub fn stream(&mut self) -> Result<RowStream, ClientError> {
        let kind = self.format.kind();
        if !kind.is_streamable() {
            return Err(ClientError::InvalidRequest(format!(
                "{} cannot be streamed row by row; use text() or json()",
                self.format
            )));
        }
        self.require_decompressed()?;
        let body = self.take_stream()?;
        Ok(RowDecoder::new(
            body,
            kind,
            self.meta.exception_tag().map(str::to_string),
        )
        .with_query_id(self.meta.query_id()))
    }

    /// Stream the body bytes as received, decompressed only if decompression
    /// was requested. Exception blocks are not detected.
    pub fn raw_stream(&mut self) -> Result<BodyStream, ClientError> {
        self.take_stream()
    }

    /// Read the whole body as text.
    pub async fn text(&mut self) -> Result<String, ClientError> {
        let bytes = self.collect().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| ClientError::Decode(format!("response is not valid UTF-8: {err}")))
    }

    /// Read the whole body as one JSON value.
    ///
    /// Single-document formats parse as-is. One-row-per-line JSON formats
    /// become an array of their rows. The value is parsed once and kept.
    pub async fn value(&mut self) -> Result<&serde_json::Value, ClientError> {
        let kind = self.format.kind();
        if !kind.is_json() {
            return Err(ClientError::Decode(format!("{} has no JSON form", self.format)));
        }
        self.collect().await?;
        match &mut self.body {
            Body::Collected { bytes, value } => {
                if value.is_none() {
                    *value = Some(parse_document(bytes, kind)?);
                }
                value.as_ref().ok_or(ClientError::AlreadyConsumed)
            }
            _ => Err(ClientError::AlreadyConsumed),
        }
    }

    /// Read the whole body and deserialize it into `T`.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, ClientError> {
        let value = self.value().await?;
        T::deserialize(value)
            .map_err(|err| ClientError::Decode(format!("response does not match type: {err}")))
    }

    fn require_decompressed(&self) -> Result<(), ClientError> {
        if self.compressed {
            return Err(ClientError::InvalidRequest(
                "response body is still gzip-compressed; use raw_stream()".to_string(),
            ));
        }
        Ok(())
    }

    fn take_stream(&mut self) -> Result<BodyStream, ClientError> {
        match std::mem::replace(&mut self.body, Body::Streamed) {
            Body::Pending(stream) => Ok(stream),
            Body::Failed(err) => {
                self.body = Body::Failed(err.clone());
                Err(err)
            }
            other => {
                self.body = other;
                Err(ClientError::AlreadyConsumed)
            }
        }
    }

    async fn collect(&mut self) -> Result<Bytes, ClientError> {
        self.require_decompressed()?;
        match std::mem::replace(&mut self.body, Body::Streamed) {
            Body::Pending(stream) => {
                let trailing = self.format.kind().trailing_data();
                let tag = self.meta.exception_tag().map(str::to_string);
                match read_checked(stream, trailing, tag).await {
                    Ok(bytes) => {
                        self.body = Body::Collected {
                            bytes: bytes.clone(),
                            value: None,
                        };
                        Ok(bytes)
                    }
                    Err(err) => {
                        let err = err.with_query_id(self.meta.query_id());
                        self.body = Body::Failed(err.clone());
                        Err(err)
                    }
                }
            }
            Body::Collected { bytes, value } => {
                self.body = Body::Collected {
                    bytes: bytes.clone(),
                    value,
                };
                Ok(bytes)
            }
            Body::Failed(err) => {
                self.body = Body::Failed(err.clone());
                Err(err)
            }
            Body::Streamed => Err(ClientError::AlreadyConsumed),
        }
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match self.body {
            Body::Pending(_) => "pending",
            Body::Collected { .. } => "collected",
            Body::Streamed => "streamed",
            Body::Failed(_) => "failed",
        };
        f.debug_struct("ResultSet")
            .field("query_id", &self.query_id())
            .field("format", &self.format)
            .field("body", &body)
            .finish()
    }
}

/// The result of [`Client::command`](crate::Client::command): the body was
/// drained and discarded.
#[derive(Clone, Debug)]
pub struct CommandResult {
    meta: ResponseMeta,
}

impl CommandResult {
    pub(crate) fn new(meta: ResponseMeta) -> Self {
        Self { meta }
    }

    pub fn query_id(&self) -> &str {
        self.meta.query_id()
    }

    pub fn summary(&self) -> Option<&QuerySummary> {
        self.meta.summary()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.meta.headers()
    }
}

/// The result of [`Client::exec`](crate::Client::exec): metadata plus the
/// still-open body.
pub struct ExecResult {
    meta: ResponseMeta,
    compressed: bool,
    body: BodyStream,
}

impl ExecResult {
    pub(crate) fn new(classified: Classified) -> Self {
        Self {
            meta: classified.meta,
            compressed: classified.compressed,
            body: classified.body,
        }
    }

    pub fn query_id(&self) -> &str {
        self.meta.query_id()
    }

    pub fn summary(&self) -> Option<&QuerySummary> {
        self.meta.summary()
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// Whether the body is still gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The body as a byte stream.
    pub fn into_stream(self) -> BodyStream {
        self.body
    }

    /// The body as rows of `format`.
    pub fn into_rows(self, format: DataFormat) -> Result<RowStream, ClientError> {
        if self.compressed {
            return Err(ClientError::InvalidRequest(
                "response body is still gzip-compressed; use into_stream()".to_string(),
            ));
        }
        let tag = self.meta.exception_tag().map(str::to_string);
        Ok(RowDecoder::new(self.body, format.kind(), tag).with_query_id(self.meta.query_id()))
    }

    /// Read and discard the body, returning the channel to the pool.
    pub async fn drain(self) -> Result<ResponseMeta, ClientError> {
        read_all(self.body).await?;
        Ok(self.meta)
    }
}

impl std::fmt::Debug for ExecResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecResult")
            .field("query_id", &self.query_id())
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}

pub(crate) async fn read_all(mut stream: BodyStream) -> Result<Bytes, ClientError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Read the whole body and reject it if it ends with an exception block.
async fn read_checked(
    stream: BodyStream,
    trailing: TrailingData,
    tag: Option<String>,
) -> Result<Bytes, ClientError> {
    let bytes = read_all(stream).await?;
    check_body(&bytes, trailing, tag)?;
    Ok(bytes)
}

fn parse_document(bytes: &[u8], kind: FormatKind) -> Result<serde_json::Value, ClientError> {
    let invalid = |err: serde_json::Error| ClientError::Decode(format!("invalid JSON: {err}"));
    match kind {
        FormatKind::StreamableJson => bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| serde_json::from_slice(line).map_err(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        FormatKind::SingleDocumentJson | FormatKind::RecordsJson => {
            serde_json::from_slice(bytes).map_err(invalid)
        }
        FormatKind::Raw => Err(ClientError::Decode("raw formats have no JSON form".to_string())),
    }
}
