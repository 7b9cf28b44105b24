//! RFC 2397 `data:` URL encoding for embedded file contents.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use thiserror::Error;

const TEXT_MEDIA_TYPE: &str = "text/plain;charset=utf-8";
const BINARY_MEDIA_TYPE: &str = "application/octet-stream";

/// Encodes `data` as a base64 `data:` URL, sniffing a text or binary type.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    let media_type = if looks_like_text(data) {
        TEXT_MEDIA_TYPE
    } else {
        BINARY_MEDIA_TYPE
    };
    format!("data:{media_type};base64,{}", STANDARD.encode(data))
}

/// Errors raised while decoding a `data:` URL.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DataUrlError {
    /// The URL does not use the `data:` scheme.
    #[error("not a data URL: {0}")]
    Scheme(String),
    /// The media type and payload are not separated by a comma.
    #[error("data URL is missing the ',' separator")]
    MissingSeparator,
    /// The payload is marked base64 but does not decode.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decodes a `data:` URL in either base64 or percent-encoded form. Malformed
/// percent escapes are kept literally.
///
/// # Errors
///
/// Returns [`DataUrlError`] when the URL is not a `data:` URL or its base64
/// payload cannot be decoded.
pub fn decode(url: &str) -> Result<Vec<u8>, DataUrlError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| DataUrlError::Scheme(url.to_owned()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or(DataUrlError::MissingSeparator)?;

    if header.ends_with(";base64") {
        return Ok(STANDARD.decode(payload)?);
    }
    Ok(percent_decode_str(payload).collect())
}

fn looks_like_text(data: &[u8]) -> bool {
    std::str::from_utf8(data).is_ok_and(|text| {
        text.chars()
            .all(|ch| !ch.is_control() || matches!(ch, '\n' | '\r' | '\t' | '\u{c}'))
    })
}
