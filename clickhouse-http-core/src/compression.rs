//! Compression negotiation types.
//!
//! This module provides configuration types for HTTP body compression:
//! - [`CompressionEncoding`]: Supported content encodings
//! - [`CompressionLevel`]: Compression quality settings

/// Supported content encodings.
///
/// Parsed from the response `Content-Encoding`; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionEncoding {
    #[default]
    Identity,
    Gzip,
}

impl CompressionEncoding {
    /// Parse from a Content-Encoding header value.
    /// Returns None for unsupported encodings.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("identity") | Some("") => Some(Self::Identity),
            Some(v) if v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip") => {
                Some(Self::Gzip)
            }
            _ => None,
        }
    }

    /// Get the header value string for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
        }
    }
}

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest compression (lowest ratio).
    Fastest,
    /// Best compression (highest ratio, slowest).
    Best,
    /// Default compression level.
    #[default]
    Default,
    /// Precise gzip level, 0-9.
    Precise(u32),
}

impl CompressionLevel {
    /// Create a compression level with a precise value.
    pub fn precise(level: u32) -> Self {
        CompressionLevel::Precise(level)
    }

    /// Convert to a flate2 gzip level (0-9).
    ///
    /// - `Fastest` → 1
    /// - `Best` → 9
    /// - `Default` → 6
    /// - `Precise(n)` → n clamped to 0-9
    pub fn to_flate2(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Best => 9,
            CompressionLevel::Default => 6,
            CompressionLevel::Precise(n) => n.clamp(0, 9),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header() {
        assert_eq!(
            CompressionEncoding::from_header(None),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("")),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("gzip")),
            Some(CompressionEncoding::Gzip)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some(" GZIP ")),
            Some(CompressionEncoding::Gzip)
        );
        assert_eq!(CompressionEncoding::from_header(Some("br")), None);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(CompressionLevel::Fastest.to_flate2(), 1);
        assert_eq!(CompressionLevel::Best.to_flate2(), 9);
        assert_eq!(CompressionLevel::Default.to_flate2(), 6);
        assert_eq!(CompressionLevel::precise(12).to_flate2(), 9);
    }
}
