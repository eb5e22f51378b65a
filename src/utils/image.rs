//! Image payload helpers for the HTTP layer

use anyhow::{Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

/// Upload content types accepted by the recognition endpoint.
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

/// Whether an upload's declared content type is an accepted image type.
///
/// Parameters such as `; charset=...` are ignored.
pub fn is_supported_image_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    SUPPORTED_IMAGE_TYPES.contains(&essence.as_str())
}

/// Decode a base64 image, with or without a `data:<type>;base64,` prefix.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>> {
    let payload = match encoded.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(&compact))
        .context("Invalid base64 image data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_and_data_url() {
        let encoded = STANDARD.encode(b"\x89PNG");
        assert_eq!(decode_base64_image(&encoded).unwrap(), b"\x89PNG");

        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_base64_image(&data_url).unwrap(), b"\x89PNG");
    }

    #[test]
    fn test_decode_tolerates_wrapping_and_missing_padding() {
        let encoded = STANDARD.encode(b"hello world");
        let wrapped = format!("{}\n{}", &encoded[..8], &encoded[8..]);
        assert_eq!(decode_base64_image(&wrapped).unwrap(), b"hello world");

        let unpadded = STANDARD_NO_PAD.encode(b"hi");
        assert_eq!(decode_base64_image(&unpadded).unwrap(), b"hi");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_base64_image("not*base64!").is_err());
    }

    #[test]
    fn test_supported_image_types() {
        assert!(is_supported_image_type("image/png"));
        assert!(is_supported_image_type("IMAGE/JPEG; name=x"));
        assert!(!is_supported_image_type("application/pdf"));
        assert!(!is_supported_image_type("text/plain"));
    }
}
