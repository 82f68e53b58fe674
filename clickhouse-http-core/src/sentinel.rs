//! Embedded exception block framing.
//!
//! When the server hits an error after it already sent a success status and
//! some rows, it appends an exception block to the body:
//!
//! ```text
//! \r\n__exception__\r\n<TAG>\n<message>\n<length> <TAG>\r\n__exception__\r\n
//! ```
//!
//! `<TAG>` is announced in the `X-ClickHouse-Exception-Tag` response header and
//! `<length>` is the byte length of `<message>` plus one for its newline.
//! The message is opaque text; no error code is parsed out of it.

use crate::error::SentinelError;

/// The marker word that opens and closes the block.
pub const EXCEPTION_MARKER: &[u8] = b"__exception__";

/// Bytes that open an exception block.
pub const OPENING_MARKER: &[u8] = b"\r\n__exception__\r\n";

/// Bytes that close an exception block.
pub const CLOSING_MARKER: &[u8] = b"\r\n__exception__\r\n";

/// The opening marker as seen by a line splitter: a line holding the marker
/// word followed by a carriage return.
pub const MARKER_LINE: &[u8] = b"__exception__\r";

/// Build a complete exception block, opening marker included.
pub fn encode_exception_block(tag: &str, message: &str) -> Vec<u8> {
    let length = message.len() + 1;
    let mut block = Vec::with_capacity(
        OPENING_MARKER.len() + CLOSING_MARKER.len() + 2 * tag.len() + message.len() + 24,
    );
    block.extend_from_slice(OPENING_MARKER);
    block.extend_from_slice(tag.as_bytes());
    block.push(b'\n');
    block.extend_from_slice(message.as_bytes());
    block.push(b'\n');
    block.extend_from_slice(length.to_string().as_bytes());
    block.push(b' ');
    block.extend_from_slice(tag.as_bytes());
    block.extend_from_slice(CLOSING_MARKER);
    block
}

/// Parse the part of an exception block that follows the opening marker.
///
/// Every piece of framing must be present: the tag line, the message, the
/// decimal length matching the message, the repeated tag and the closing
/// marker. When `expected_tag` is given, both tags must equal it.
pub fn parse_exception_block(
    block: &[u8],
    expected_tag: Option<&str>,
) -> Result<String, SentinelError> {
    let body = block
        .strip_suffix(CLOSING_MARKER)
        .ok_or(SentinelError::MissingClosingMarker)?;

    let tag_end = body
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(SentinelError::MissingTag)?;
    let tag = &body[..tag_end];
    if tag.is_empty() {
        return Err(SentinelError::MissingTag);
    }
    if let Some(expected) = expected_tag {
        if expected.as_bytes() != tag {
            return Err(SentinelError::TagMismatch {
                expected: expected.to_string(),
                found: String::from_utf8_lossy(tag).into_owned(),
            });
        }
    }

    // "<message>\n<length> <TAG>"
    let rest = &body[tag_end + 1..];
    let trailing_tag_start = rest.len().checked_sub(tag.len() + 1);
    let head = match trailing_tag_start {
        Some(start) if rest[start] == b' ' && &rest[start + 1..] == tag => &rest[..start],
        _ => {
            let found = rest
                .iter()
                .rposition(|b| *b == b' ')
                .map(|space| String::from_utf8_lossy(&rest[space + 1..]).into_owned())
                .unwrap_or_default();
            return Err(SentinelError::TagMismatch {
                expected: String::from_utf8_lossy(tag).into_owned(),
                found,
            });
        }
    };

    let length_start = head
        .iter()
        .rposition(|b| *b == b'\n')
        .ok_or(SentinelError::InvalidLength)?;
    let declared = parse_decimal(&head[length_start + 1..]).ok_or(SentinelError::InvalidLength)?;
    let message = &head[..length_start];

    if declared != message.len() + 1 {
        return Err(SentinelError::LengthMismatch {
            declared,
            actual: message.len() + 1,
        });
    }

    Ok(String::from_utf8_lossy(message).into_owned())
}

/// Returns true if `bytes` is a non-empty prefix of [`MARKER_LINE`], i.e. the
/// stream may have been cut while the opening marker was being written.
pub fn is_marker_line_prefix(bytes: &[u8]) -> bool {
    !bytes.is_empty() && MARKER_LINE.starts_with(bytes)
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
