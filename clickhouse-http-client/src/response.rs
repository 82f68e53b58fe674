//! Response handling.
//!
//! - classifier: routes a response head to the error path or the success path
//! - body: the success body as a guarded byte stream that returns its channel
//! - cursor / [`RowDecoder`]: newline splitting and exception block detection
//! - [`Row`]: one decoded line
//! - [`ResultSet`], [`CommandResult`], [`ExecResult`]: what the client hands back

mod body;
mod classifier;
mod cursor;
mod decoder;
mod result_set;
mod row;

pub use decoder::RowDecoder;
pub use result_set::{CommandResult, ExecResult, ResultSet, RowStream};
pub use row::Row;

pub(crate) use classifier::{Classified, classify};
pub(crate) use cursor::check_body;
pub(crate) use result_set::read_all;

use http::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};

pub(crate) const QUERY_ID_HEADER: &str = "x-clickhouse-query-id";
pub(crate) const SUMMARY_HEADER: &str = "x-clickhouse-summary";
pub(crate) const EXCEPTION_CODE_HEADER: &str = "x-clickhouse-exception-code";
pub(crate) const EXCEPTION_TAG_HEADER: &str = "x-clickhouse-exception-tag";

/// Progress counters the server reports in `X-ClickHouse-Summary`.
///
/// The server sends every counter as a JSON string; numbers are accepted
/// too, and anything unparsable reads as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySummary {
    #[serde(deserialize_with = "lenient_u64")]
    pub read_rows: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub read_bytes: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub written_rows: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub written_bytes: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub total_rows_to_read: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub result_rows: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub result_bytes: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub elapsed_ns: u64,
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s.parse().unwrap_or_default(),
        serde_json::Value::Number(n) => n.as_u64().unwrap_or_default(),
        _ => 0,
    })
}

/// What every response carries besides its body.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    query_id: String,
    summary: Option<QuerySummary>,
    exception_tag: Option<String>,
    headers: HeaderMap,
}

impl ResponseMeta {
    /// `request_query_id` is used when the server does not echo one.
    pub(crate) fn from_headers(headers: HeaderMap, request_query_id: &str) -> Self {
        let query_id = header_str(&headers, QUERY_ID_HEADER)
            .unwrap_or(request_query_id)
            .to_string();
        let summary = header_str(&headers, SUMMARY_HEADER)
            .and_then(|raw| serde_json::from_str(raw).ok());
        let exception_tag = header_str(&headers, EXCEPTION_TAG_HEADER).map(str::to_string);
        Self {
            query_id,
            summary,
            exception_tag,
            headers,
        }
    }

    /// The query id the server ran the statement under.
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// The parsed `X-ClickHouse-Summary` header, when present and valid JSON.
    pub fn summary(&self) -> Option<&QuerySummary> {
        self.summary.as_ref()
    }

    /// The tag framing an embedded exception block, when announced.
    pub fn exception_tag(&self) -> Option<&str> {
        self.exception_tag.as_deref()
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_summary_from_string_counters() {
        let raw = r#"{"read_rows":"2","read_bytes":"16","written_rows":"0","written_bytes":"0","total_rows_to_read":"2","result_rows":"2","result_bytes":"272","elapsed_ns":"1250000"}"#;
        let summary: QuerySummary = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.read_rows, 2);
        assert_eq!(summary.result_bytes, 272);
        assert_eq!(summary.elapsed_ns, 1_250_000);
    }

    #[test]
    fn test_summary_is_lenient() {
        let summary: QuerySummary =
            serde_json::from_str(r#"{"read_rows":5,"read_bytes":"n/a","extra":"1"}"#).unwrap();
        assert_eq!(summary.read_rows, 5);
        assert_eq!(summary.read_bytes, 0);
        assert_eq!(summary.written_rows, 0);
    }

    #[test]
    fn test_meta_prefers_server_query_id() {
        let mut headers = HeaderMap::new();
        headers.insert(QUERY_ID_HEADER, HeaderValue::from_static("server-id"));
        headers.insert(EXCEPTION_TAG_HEADER, HeaderValue::from_static("abc"));
        headers.insert(SUMMARY_HEADER, HeaderValue::from_static(r#"{"read_rows":"1"}"#));

        let meta = ResponseMeta::from_headers(headers, "request-id");
        assert_eq!(meta.query_id(), "server-id");
        assert_eq!(meta.exception_tag(), Some("abc"));
        assert_eq!(meta.summary().unwrap().read_rows, 1);

        let meta = ResponseMeta::from_headers(HeaderMap::new(), "request-id");
        assert_eq!(meta.query_id(), "request-id");
        assert!(meta.summary().is_none());
    }
}
