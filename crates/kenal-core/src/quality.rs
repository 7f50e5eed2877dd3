//! Pre-enrollment capture quality gate.
//!
//! A bad enrolled template poisons every later recognition attempt for that
//! identity, so captures are validated before they reach the registry.
//! Checks run in order and stop at the first failure.

use crate::ingest;
use crate::types::FaceBox;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Minimum share of the frame the detected face must cover.
const MIN_FACE_AREA_RATIO: f64 = 0.10;
/// Acceptable mean-intensity window.
const MIN_BRIGHTNESS: f32 = 50.0;
const MAX_BRIGHTNESS: f32 = 200.0;
/// Variance-of-Laplacian focus floor; lower readings indicate motion blur
/// or a missed focus.
const MIN_FOCUS_MEASURE: f64 = 100.0;

/// Verdict on whether a capture is usable for enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub valid: bool,
    pub message: String,
    /// Corrective suggestions; empty when the capture passes.
    pub suggestions: Vec<String>,
}

impl QualityReport {
    pub fn reject(message: &str, suggestions: &[&str]) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn pass() -> Self {
        Self {
            valid: true,
            message: "Capture quality is good enough for enrollment".to_string(),
            suggestions: Vec::new(),
        }
    }
}

/// Validate a capture against its located faces.
pub fn assess(frame: &GrayImage, faces: &[FaceBox]) -> QualityReport {
    if faces.is_empty() {
        return QualityReport::reject(
            "No face detected in the capture",
            &[
                "Make sure your face is clearly visible",
                "Improve the lighting and try again",
            ],
        );
    }
    if faces.len() > 1 {
        return QualityReport::reject(
            "More than one face detected",
            &[
                "Make sure only one face is in the frame",
                "Ask other people to step out of view",
            ],
        );
    }

    let (width, height) = frame.dimensions();
    let frame_area = width as u64 * height as u64;
    let face = &faces[0];
    if frame_area == 0 || (face.area() as f64) < MIN_FACE_AREA_RATIO * frame_area as f64 {
        return QualityReport::reject(
            "Face is too small in the frame",
            &[
                "Move closer to the camera",
                "The face should fill at least a fifth of the frame",
            ],
        );
    }

    let brightness = ingest::mean_brightness(frame);
    if brightness < MIN_BRIGHTNESS {
        return QualityReport::reject(
            "Capture is too dark",
            &["Add more light", "Face a window or a lamp"],
        );
    }
    if brightness > MAX_BRIGHTNESS {
        return QualityReport::reject(
            "Capture is too bright",
            &["Reduce the lighting", "Avoid strong backlight"],
        );
    }

    let focus = focus_measure(frame);
    if focus < MIN_FOCUS_MEASURE {
        tracing::debug!(focus, "capture rejected as blurry");
        return QualityReport::reject(
            "Capture is too blurry",
            &["Hold the camera steady", "Wait for the camera to focus"],
        );
    }

    QualityReport::pass()
}

/// Variance of the Laplacian response — a cheap focus/blur measure.
pub fn focus_measure(frame: &GrayImage) -> f64 {
    if frame.width() < 3 || frame.height() < 3 {
        return 0.0;
    }

    let response = imageproc::filter::laplacian_filter(frame);
    let n = response.len() as f64;
    if n == 0.0 {
        return 0.0;
    }

    let mean = response.iter().map(|&v| v as f64).sum::<f64>() / n;
    response
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Textured mid-brightness capture that passes every check.
    fn sharp_frame() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, y| {
            Luma([if (x + y) % 2 == 0 { 90 } else { 160 }])
        })
    }

    fn flat_frame(level: u8) -> GrayImage {
        GrayImage::from_pixel(100, 100, Luma([level]))
    }

    fn face(side: u32) -> FaceBox {
        FaceBox { x: 25, y: 25, width: side, height: side, score: 4.0 }
    }

    #[test]
    fn test_good_capture_passes() {
        let report = assess(&sharp_frame(), &[face(50)]);
        assert!(report.valid, "rejected: {}", report.message);
        assert!(report.suggestions.is_empty());
    }

    #[test]
    fn test_no_face_rejected_with_suggestions() {
        let report = assess(&sharp_frame(), &[]);
        assert!(!report.valid);
        assert!(report.message.contains("No face"));
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn test_multiple_faces_rejected() {
        let report = assess(&sharp_frame(), &[face(50), face(40)]);
        assert!(!report.valid);
        assert!(report.message.contains("More than one face"));
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn test_small_face_rejected() {
        // 10x10 of 100x100 is 1% of the frame, well under the 10% floor.
        let report = assess(&sharp_frame(), &[face(10)]);
        assert!(!report.valid);
        assert!(report.message.contains("too small"));
    }

    #[test]
    fn test_face_at_area_floor_passes_size_check() {
        // 32x32 of 100x100 is 10.24%, just over the floor.
        let report = assess(&sharp_frame(), &[face(32)]);
        assert!(report.valid, "rejected: {}", report.message);
    }

    #[test]
    fn test_dark_capture_rejected() {
        let report = assess(&flat_frame(30), &[face(50)]);
        assert!(!report.valid);
        assert!(report.message.contains("too dark"));
    }

    #[test]
    fn test_bright_capture_rejected() {
        let report = assess(&flat_frame(220), &[face(50)]);
        assert!(!report.valid);
        assert!(report.message.contains("too bright"));
    }

    #[test]
    fn test_blurry_capture_rejected() {
        // Flat mid-gray passes the brightness window but has no edges at all.
        let report = assess(&flat_frame(125), &[face(50)]);
        assert!(!report.valid);
        assert!(report.message.contains("too blurry"));
    }

    #[test]
    fn test_focus_measure_flat_is_zero() {
        assert_eq!(focus_measure(&flat_frame(125)), 0.0);
    }

    #[test]
    fn test_focus_measure_textured_is_high() {
        assert!(focus_measure(&sharp_frame()) > MIN_FOCUS_MEASURE);
    }

    #[test]
    fn test_focus_measure_tiny_frame_is_zero() {
        let tiny = GrayImage::from_pixel(2, 2, Luma([125]));
        assert_eq!(focus_measure(&tiny), 0.0);
    }
}
