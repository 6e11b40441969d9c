//! Image normalization for the captioning pipeline.
//!
//! Every uploaded slice is normalized to a fixed 896×896 JPEG (cover resize,
//! center crop) before storage and inference; providers only ever see the
//! base64 of the normalized bytes, never raw uploads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;

/// Square raster every slice is normalized to.
pub const TARGET_DIMENSION: u32 = 896;
const JPEG_QUALITY: u8 = 90;
pub const NORMALIZED_MIME: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// A slice normalized for storage and inference.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub jpeg_bytes: Vec<u8>,
    pub base64: String,
}

/// Upload formats the intake endpoint accepts.
pub fn is_supported_content_type(content_type: &str) -> bool {
    matches!(
        content_type.to_ascii_lowercase().as_str(),
        "image/jpeg" | "image/jpg" | "image/png" | "image/webp"
    )
}

/// Decode, cover-resize to 896×896 with center crop, re-encode as JPEG
/// quality 90, and base64 the result. A decode failure means the input is
/// deterministically invalid — callers must not retry it.
pub fn normalize_image(raw: &[u8]) -> Result<NormalizedImage, ImagingError> {
    let decoded = image::load_from_memory(raw).map_err(|e| ImagingError::Decode(e.to_string()))?;

    let resized = decoded.resize_to_fill(TARGET_DIMENSION, TARGET_DIMENSION, FilterType::Lanczos3);
    let (width, height) = resized.dimensions();
    let rgb = resized.to_rgb8();

    let mut jpeg_bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_bytes, JPEG_QUALITY);
    encoder
        .encode(rgb.as_raw(), width, height, image::ColorType::Rgb8)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;

    let base64 = BASE64.encode(&jpeg_bytes);
    Ok(NormalizedImage { jpeg_bytes, base64 })
}
