//! Image ingestion — payload decode and capture normalization.
//!
//! Captures arrive as base64 text, usually straight from a browser camera
//! element and therefore often carrying a `data:image/...;base64,` header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{imageops, DynamicImage, GrayImage};
use thiserror::Error;

/// Longest allowed image side; larger captures are downscaled.
const MAX_DIMENSION: u32 = 1024;
/// Mean intensity below which the lighting boost is applied.
const DARK_MEAN_THRESHOLD: f32 = 80.0;
/// Linear boost applied to dark captures: `p * GAIN + LIFT`, clamped.
const BOOST_GAIN: f32 = 1.3;
const BOOST_LIFT: f32 = 30.0;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty image payload")]
    EmptyPayload,
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload bytes are not a decodable image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64 image payload into a normalized grayscale bitmap.
///
/// Strips a data-URL header when present, decodes, converts to grayscale,
/// caps the longer side at `MAX_DIMENSION` preserving aspect ratio, and
/// lifts dark captures so the cascade still has something to work with.
pub fn decode_payload(payload: &str) -> Result<GrayImage, DecodeError> {
    let trimmed = payload.trim();
    let encoded = match trimmed.split_once(',') {
        Some((head, rest)) if head.starts_with("data:") => rest,
        _ => trimmed,
    };
    if encoded.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let bytes = BASE64.decode(encoded)?;
    let decoded = image::load_from_memory(&bytes)?;
    Ok(normalize(decoded))
}

/// Normalize a decoded capture: grayscale, size cap, lighting boost.
///
/// Deterministic and side-effect-free beyond the returned bitmap.
pub fn normalize(image: DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();

    let (width, height) = gray.dimensions();
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        // One scale factor for both axes so the capture is never distorted.
        let scale = (MAX_DIMENSION as f32 / width as f32).min(MAX_DIMENSION as f32 / height as f32);
        let new_width = ((width as f32 * scale) as u32).max(1);
        let new_height = ((height as f32 * scale) as u32).max(1);
        gray = imageops::resize(&gray, new_width, new_height, imageops::FilterType::Triangle);
        tracing::debug!(width = new_width, height = new_height, "downscaled oversized capture");
    }

    let brightness = mean_brightness(&gray);
    if brightness < DARK_MEAN_THRESHOLD {
        for p in gray.iter_mut() {
            *p = (*p as f32 * BOOST_GAIN + BOOST_LIFT).round().clamp(0.0, 255.0) as u8;
        }
        tracing::debug!(brightness, "applied lighting boost to dark capture");
    }

    gray
}

/// Average pixel intensity (0.0–255.0).
pub fn mean_brightness(gray: &GrayImage) -> f32 {
    let raw = gray.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    raw.iter().map(|&p| p as f32).sum::<f32>() / raw.len() as f32
}
