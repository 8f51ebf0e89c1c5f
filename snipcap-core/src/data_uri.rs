use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("captured audio is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("invalid mime type: {0:?}")]
    InvalidMimeType(String),

    #[error("not a base64 data uri")]
    Malformed,

    #[error("base64 decode failed: {0}")]
    Decode(String),
}

/// Strips parameters (`audio/webm; codecs=opus` -> `audio/webm`).
pub fn base_mime_type(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}

fn valid_mime(mime: &str) -> bool {
    let mut parts = mime.splitn(2, '/');
    let (Some(top), Some(sub)) = (parts.next(), parts.next()) else {
        return false;
    };
    let token = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
    };
    token(top) && token(sub)
}

/// Encodes a finished recording as `data:<mime>;base64,<payload>`.
pub fn encode_data_uri(mime: &str, bytes: &[u8], limit: usize) -> Result<String, ConversionError> {
    let mime = base_mime_type(mime);
    if !valid_mime(mime) {
        return Err(ConversionError::InvalidMimeType(mime.to_string()));
    }
    if bytes.len() > limit {
        return Err(ConversionError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    let payload = STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{payload}"))
}

/// Inverse of [`encode_data_uri`]; returns the mime type and raw bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), ConversionError> {
    let rest = uri.strip_prefix("data:").ok_or(ConversionError::Malformed)?;
    let (header, payload) = rest.split_once(',').ok_or(ConversionError::Malformed)?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or(ConversionError::Malformed)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| ConversionError::Decode(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}
