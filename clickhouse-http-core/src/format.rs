//! Output formats understood by the row decoder.
//!
//! Formats are a closed set. Each one belongs to a [`FormatKind`], and the
//! decoder's behavior is chosen per kind with exhaustive matches instead of a
//! table keyed by format name.

use std::str::FromStr;

/// How a format's body is shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// One JSON value per newline-terminated line.
    StreamableJson,
    /// The whole body is a single JSON document.
    SingleDocumentJson,
    /// The whole body is a single JSON object keyed by row name.
    RecordsJson,
    /// Newline-delimited text without a structured form.
    Raw,
}

/// What to do with bytes left after the last newline when the stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingData {
    /// Emit the leftover bytes as a final row.
    Row,
    /// Fail the stream: every row of this format ends with a newline.
    Reject,
}

impl FormatKind {
    /// Whether rows may be read one at a time.
    pub fn is_streamable(&self) -> bool {
        match self {
            FormatKind::StreamableJson | FormatKind::Raw => true,
            FormatKind::SingleDocumentJson | FormatKind::RecordsJson => false,
        }
    }

    /// Whether the body (or each row) has a JSON form.
    pub fn is_json(&self) -> bool {
        match self {
            FormatKind::StreamableJson
            | FormatKind::SingleDocumentJson
            | FormatKind::RecordsJson => true,
            FormatKind::Raw => false,
        }
    }

    /// Policy for an unterminated tail at end of stream.
    pub fn trailing_data(&self) -> TrailingData {
        match self {
            FormatKind::StreamableJson => TrailingData::Reject,
            FormatKind::Raw => TrailingData::Row,
            // Whole-document kinds are never split into rows.
            FormatKind::SingleDocumentJson | FormatKind::RecordsJson => TrailingData::Row,
        }
    }
}

/// Output formats the driver can request and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    #[default]
    JsonEachRow,
    JsonStringsEachRow,
    JsonCompactEachRow,
    JsonCompactStringsEachRow,
    JsonCompactEachRowWithNames,
    JsonCompactEachRowWithNamesAndTypes,
    JsonEachRowWithProgress,
    Json,
    JsonStrings,
    JsonCompact,
    JsonCompactStrings,
    JsonColumnsWithMetadata,
    JsonObjectEachRow,
    Csv,
    CsvWithNames,
    TabSeparated,
    TabSeparatedWithNames,
    CustomSeparated,
}

impl DataFormat {
    /// The name sent to the server as `default_format`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::JsonEachRow => "JSONEachRow",
            DataFormat::JsonStringsEachRow => "JSONStringsEachRow",
            DataFormat::JsonCompactEachRow => "JSONCompactEachRow",
            DataFormat::JsonCompactStringsEachRow => "JSONCompactStringsEachRow",
            DataFormat::JsonCompactEachRowWithNames => "JSONCompactEachRowWithNames",
            DataFormat::JsonCompactEachRowWithNamesAndTypes => {
                "JSONCompactEachRowWithNamesAndTypes"
            }
            DataFormat::JsonEachRowWithProgress => "JSONEachRowWithProgress",
            DataFormat::Json => "JSON",
            DataFormat::JsonStrings => "JSONStrings",
            DataFormat::JsonCompact => "JSONCompact",
            DataFormat::JsonCompactStrings => "JSONCompactStrings",
            DataFormat::JsonColumnsWithMetadata => "JSONColumnsWithMetadata",
            DataFormat::JsonObjectEachRow => "JSONObjectEachRow",
            DataFormat::Csv => "CSV",
            DataFormat::CsvWithNames => "CSVWithNames",
            DataFormat::TabSeparated => "TabSeparated",
            DataFormat::TabSeparatedWithNames => "TabSeparatedWithNames",
            DataFormat::CustomSeparated => "CustomSeparated",
        }
    }

    /// The wire shape of this format.
    pub fn kind(&self) -> FormatKind {
        match self {
            DataFormat::JsonEachRow
            | DataFormat::JsonStringsEachRow
            | DataFormat::JsonCompactEachRow
            | DataFormat::JsonCompactStringsEachRow
            | DataFormat::JsonCompactEachRowWithNames
            | DataFormat::JsonCompactEachRowWithNamesAndTypes
            | DataFormat::JsonEachRowWithProgress => FormatKind::StreamableJson,
            DataFormat::Json
            | DataFormat::JsonStrings
            | DataFormat::JsonCompact
            | DataFormat::JsonCompactStrings
            | DataFormat::JsonColumnsWithMetadata => FormatKind::SingleDocumentJson,
            DataFormat::JsonObjectEachRow => FormatKind::RecordsJson,
            DataFormat::Csv
            | DataFormat::CsvWithNames
            | DataFormat::TabSeparated
            | DataFormat::TabSeparatedWithNames
            | DataFormat::CustomSeparated => FormatKind::Raw,
        }
    }

    const ALL: [DataFormat; 18] = [
        DataFormat::JsonEachRow,
        DataFormat::JsonStringsEachRow,
        DataFormat::JsonCompactEachRow,
        DataFormat::JsonCompactStringsEachRow,
        DataFormat::JsonCompactEachRowWithNames,
        DataFormat::JsonCompactEachRowWithNamesAndTypes,
        DataFormat::JsonEachRowWithProgress,
        DataFormat::Json,
        DataFormat::JsonStrings,
        DataFormat::JsonCompact,
        DataFormat::JsonCompactStrings,
        DataFormat::JsonColumnsWithMetadata,
        DataFormat::JsonObjectEachRow,
        DataFormat::Csv,
        DataFormat::CsvWithNames,
        DataFormat::TabSeparated,
        DataFormat::TabSeparatedWithNames,
        DataFormat::CustomSeparated,
    ];
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`DataFormat`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported format: {0}")]
pub struct UnknownFormat(pub String);

impl FromStr for DataFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataFormat::ALL
            .iter()
            .copied()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip_through_from_str() {
        for format in DataFormat::ALL {
            assert_eq!(format.as_str().parse::<DataFormat>(), Ok(format));
        }
        assert!("Parquet".parse::<DataFormat>().is_err());
    }

    #[test]
    fn test_kind_rules() {
        assert!(DataFormat::JsonEachRow.kind().is_streamable());
        assert!(DataFormat::Csv.kind().is_streamable());
        assert!(!DataFormat::Json.kind().is_streamable());
        assert!(!DataFormat::JsonObjectEachRow.kind().is_streamable());

        assert!(DataFormat::JsonObjectEachRow.kind().is_json());
        assert!(!DataFormat::TabSeparated.kind().is_json());
    }

    #[test]
    fn test_trailing_policy() {
        assert_eq!(
            DataFormat::JsonCompactEachRow.kind().trailing_data(),
            TrailingData::Reject
        );
        assert_eq!(DataFormat::CsvWithNames.kind().trailing_data(), TrailingData::Row);
    }
}
