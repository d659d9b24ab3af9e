//! Image content validation. Decoding stops at format detection: the
//! proxy never rasterizes, it only refuses to forward images that lie
//! about what they are.

use base64::Engine;
use bifrost_core::error::{BifrostError, Result};

/// Decoded size cap, per upstream limits.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

pub const SUPPORTED_MEDIA_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

/// Validate a base64 image against its declared media type. Returns
/// the decoded bytes so callers can size-check derived payloads.
pub fn validate(media_type: &str, data: &str) -> Result<Vec<u8>> {
    if !SUPPORTED_MEDIA_TYPES.contains(&media_type) {
        return Err(BifrostError::InvalidContent(format!(
            "unsupported image media type '{media_type}'"
        )));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| BifrostError::InvalidContent(format!("image base64 invalid: {e}")))?;

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(BifrostError::InvalidContent(format!(
            "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
            bytes.len()
        )));
    }

    match detect(&bytes) {
        Some(detected) if detected == media_type => Ok(bytes),
        Some(detected) => Err(BifrostError::InvalidContent(format!(
            "image declared {media_type} but bytes look like {detected}"
        ))),
        None => Err(BifrostError::InvalidContent(
            "image bytes match no supported format".to_string(),
        )),
    }
}

/// Sniff the media type from magic bytes.
pub fn detect(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

/// Media subtype as the upstream wire wants it (`png`, not `image/png`).
pub fn subtype(media_type: &str) -> &str {
    media_type.strip_prefix("image/").unwrap_or(media_type)
}
