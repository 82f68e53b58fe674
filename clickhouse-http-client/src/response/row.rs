//! Decoded rows.

use std::sync::OnceLock;

use bytes::Bytes;
use clickhouse_http_core::FormatKind;
use serde::de::DeserializeOwned;

use crate::ClientError;

/// One line of a streamed result.
///
/// The text is fixed when the row is produced. [`Row::value`] parses it at
/// most once and keeps the result; [`Row::json`] deserializes from the same
/// text into any type.
#[derive(Debug)]
pub struct Row {
    text: Bytes,
    kind: FormatKind,
    parsed: OnceLock<Result<serde_json::Value, ClientError>>,
}

impl Row {
    pub(crate) fn new(text: Bytes, kind: FormatKind) -> Self {
        Self {
            text,
            kind,
            parsed: OnceLock::new(),
        }
    }

    /// The raw bytes of the row, without its newline.
    pub fn bytes(&self) -> &Bytes {
        &self.text
    }

    /// The row as UTF-8 text.
    pub fn text(&self) -> Result<&str, ClientError> {
        std::str::from_utf8(&self.text)
            .map_err(|err| ClientError::Decode(format!("row is not valid UTF-8: {err}")))
    }

    /// The row parsed as a JSON value. Parsed once, then served from memory.
    pub fn value(&self) -> Result<&serde_json::Value, ClientError> {
        self.parsed
            .get_or_init(|| {
                self.require_json()?;
                serde_json::from_slice(&self.text)
                    .map_err(|err| ClientError::Decode(format!("row is not valid JSON: {err}")))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Deserialize the row into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        self.require_json()?;
        serde_json::from_slice(&self.text)
            .map_err(|err| ClientError::Decode(format!("row does not match type: {err}")))
    }

    /// The format category this row was decoded under.
    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    fn require_json(&self) -> Result<(), ClientError> {
        if self.kind.is_json() {
            Ok(())
        } else {
            Err(ClientError::Decode(
                "rows of this format have no JSON form; use text()".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Number {
        number: String,
    }

    #[test]
    fn test_value_is_memoized() {
        let row = Row::new(Bytes::from("{\"number\":\"0\"}"), FormatKind::StreamableJson);
        let first = row.value().unwrap() as *const serde_json::Value;
        let second = row.value().unwrap() as *const serde_json::Value;
        assert_eq!(first, second);
        assert_eq!(row.value().unwrap()["number"], "0");
    }

    #[test]
    fn test_json_into_type() {
        let row = Row::new(Bytes::from("{\"number\":\"7\"}"), FormatKind::StreamableJson);
        let first: Number = row.json().unwrap();
        let second: Number = row.json().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.number, "7");
    }

    #[test]
    fn test_invalid_json_is_decode_error_every_time() {
        let row = Row::new(Bytes::from("{\"number\":"), FormatKind::StreamableJson);
        assert!(matches!(row.value(), Err(ClientError::Decode(_))));
        assert!(matches!(row.value(), Err(ClientError::Decode(_))));
        assert_eq!(row.text().unwrap(), "{\"number\":");
    }

    #[test]
    fn test_raw_rows_have_no_json_form() {
        let row = Row::new(Bytes::from("1\tfoo"), FormatKind::Raw);
        assert_eq!(row.text().unwrap(), "1\tfoo");
        assert!(matches!(row.value(), Err(ClientError::Decode(_))));
        assert!(matches!(row.json::<Number>(), Err(ClientError::Decode(_))));
    }
}
