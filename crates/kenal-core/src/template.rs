//! Face template extraction.
//!
//! Crops the padded face region and normalizes it to the fixed patch size.
//! The resize ignores aspect ratio; the distortion is identical on the
//! enrollment and query sides, so it cancels out in comparison.

use crate::types::{BadTemplateSize, FaceBox, Template, TEMPLATE_SIZE};
use image::{imageops, GrayImage};
use thiserror::Error;

/// Padding added around a detected box before cropping, in pixels per side.
const FACE_PADDING: i64 = 20;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("face region at ({x}, {y}) lies outside the {frame_width}x{frame_height} frame")]
    OutOfBounds {
        x: i32,
        y: i32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("face region degenerates to an empty crop after clamping")]
    EmptyRegion,
    #[error(transparent)]
    BadPatch(#[from] BadTemplateSize),
}

/// Crop the padded face region and resize it to the fixed template patch.
pub fn extract_template(frame: &GrayImage, face: &FaceBox) -> Result<Template, ExtractionError> {
    let (frame_width, frame_height) = frame.dimensions();

    let x0 = (face.x as i64 - FACE_PADDING).max(0);
    let y0 = (face.y as i64 - FACE_PADDING).max(0);
    if x0 >= frame_width as i64 || y0 >= frame_height as i64 {
        return Err(ExtractionError::OutOfBounds {
            x: face.x,
            y: face.y,
            frame_width,
            frame_height,
        });
    }

    let width = (face.width as i64 + 2 * FACE_PADDING).min(frame_width as i64 - x0);
    let height = (face.height as i64 + 2 * FACE_PADDING).min(frame_height as i64 - y0);
    if width <= 0 || height <= 0 {
        return Err(ExtractionError::EmptyRegion);
    }

    let crop = imageops::crop_imm(frame, x0 as u32, y0 as u32, width as u32, height as u32).to_image();
    let patch = imageops::resize(&crop, TEMPLATE_SIZE, TEMPLATE_SIZE, imageops::FilterType::Triangle);
    Ok(Template::from_pixels(patch.into_raw())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 2 + y * 3) % 256) as u8]))
    }

    fn face(x: i32, y: i32, side: u32) -> FaceBox {
        FaceBox { x, y, width: side, height: side, score: 4.0 }
    }

    #[test]
    fn test_extract_yields_fixed_patch_size() {
        let frame = gradient(100, 100);
        let template = extract_template(&frame, &face(40, 40, 20)).unwrap();
        assert_eq!(template.pixels().len(), (TEMPLATE_SIZE * TEMPLATE_SIZE) as usize);
    }

    #[test]
    fn test_extract_clamps_at_frame_border() {
        let frame = gradient(100, 100);
        // Padding would reach (-20, -20); the crop clamps to the frame.
        let template = extract_template(&frame, &face(0, 0, 30)).unwrap();
        assert_eq!(template.pixels().len(), (TEMPLATE_SIZE * TEMPLATE_SIZE) as usize);
    }

    #[test]
    fn test_extract_clamps_at_far_edge() {
        let frame = gradient(100, 100);
        let template = extract_template(&frame, &face(70, 70, 40)).unwrap();
        assert_eq!(template.pixels().len(), (TEMPLATE_SIZE * TEMPLATE_SIZE) as usize);
    }

    #[test]
    fn test_extract_rejects_box_outside_frame() {
        let frame = gradient(100, 100);
        let err = extract_template(&frame, &face(200, 10, 40)).unwrap_err();
        assert!(matches!(err, ExtractionError::OutOfBounds { .. }));
    }

    #[test]
    fn test_extract_is_deterministic() {
        let frame = gradient(120, 90);
        let a = extract_template(&frame, &face(30, 20, 50)).unwrap();
        let b = extract_template(&frame, &face(30, 20, 50)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_normalizes_across_resolutions() {
        // The same scene at two resolutions yields patches of identical
        // fixed dimensions.
        let small = gradient(100, 100);
        let large = gradient(400, 400);
        let from_small = extract_template(&small, &face(25, 25, 50)).unwrap();
        let from_large = extract_template(&large, &face(100, 100, 200)).unwrap();
        assert_eq!(from_small.pixels().len(), from_large.pixels().len());
    }
}
