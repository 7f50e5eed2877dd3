//! Graduated classical face localization.
//!
//! Wraps the SeetaFace funnel-structured cascade behind the [`FaceLocator`]
//! seam and retries detection with progressively more permissive parameter
//! profiles: well-lit frontal captures match on the strict profile with low
//! false-positive risk, while hard lighting and pose still get a chance on
//! the looser ones.

use crate::types::FaceBox;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

/// Smallest face side the cascade window can represent.
const CASCADE_WINDOW_FLOOR: u32 = 20;

/// One detector parameter profile. Profiles run strict → permissive.
#[derive(Debug, Clone, Copy)]
pub struct DetectionProfile {
    /// Smallest face side considered, in pixels.
    pub min_face_size: u32,
    /// Cascade score threshold; lower admits weaker candidates.
    pub score_threshold: f64,
    /// Image pyramid scale step; closer to 1.0 samples scales more finely.
    pub pyramid_scale: f32,
    /// Sliding-window step in pixels.
    pub window_step: u32,
}

/// The four sensitivity profiles, tried in order until one finds a face.
pub const DETECTION_PROFILES: [DetectionProfile; 4] = [
    DetectionProfile { min_face_size: 80, score_threshold: 4.0, pyramid_scale: 0.80, window_step: 4 },
    DetectionProfile { min_face_size: 60, score_threshold: 3.0, pyramid_scale: 0.80, window_step: 4 },
    DetectionProfile { min_face_size: 40, score_threshold: 2.5, pyramid_scale: 0.85, window_step: 4 },
    DetectionProfile { min_face_size: 20, score_threshold: 2.0, pyramid_scale: 0.90, window_step: 2 },
];

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("model file not found: {0} — download the SeetaFace frontal model and place it in models/")]
    ModelNotFound(String),
    #[error("failed to load detector model: {0}")]
    ModelLoad(String),
}

/// Locates face bounding boxes in a grayscale bitmap.
///
/// An empty result is a normal, expected outcome — never an error.
pub trait FaceLocator {
    fn locate(&mut self, frame: &GrayImage) -> Vec<FaceBox>;
}

/// SeetaFace-backed locator with graduated sensitivity.
pub struct SeetaLocator {
    detector: Box<dyn rustface::Detector>,
}

impl std::fmt::Debug for SeetaLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeetaLocator").finish_non_exhaustive()
    }
}

impl SeetaLocator {
    /// Load the SeetaFace detection model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let detector = rustface::create_detector(model_path)
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
        tracing::info!(path = model_path, "face detection model loaded");

        Ok(Self { detector })
    }

    /// Run one detection pass with the given profile, score-sorted.
    fn detect_with(&mut self, frame: &GrayImage, profile: &DetectionProfile) -> Vec<FaceBox> {
        self.detector.set_min_face_size(profile.min_face_size.max(CASCADE_WINDOW_FLOOR));
        self.detector.set_score_thresh(profile.score_threshold);
        self.detector.set_pyramid_scale_factor(profile.pyramid_scale);
        self.detector
            .set_slide_window_step(profile.window_step, profile.window_step);

        let (width, height) = frame.dimensions();
        let mut image = rustface::ImageData::new(frame, width, height);

        let mut faces: Vec<FaceBox> = self
            .detector
            .detect(&mut image)
            .into_iter()
            .map(|info| {
                let bbox = info.bbox();
                FaceBox {
                    x: bbox.x(),
                    y: bbox.y(),
                    width: bbox.width(),
                    height: bbox.height(),
                    score: info.score() as f32,
                }
            })
            .collect();

        faces.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        faces
    }
}

impl FaceLocator for SeetaLocator {
    fn locate(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
        for (index, profile) in DETECTION_PROFILES.iter().enumerate() {
            let faces = self.detect_with(frame, profile);
            if !faces.is_empty() {
                tracing::debug!(profile = index, count = faces.len(), "faces located");
                return faces;
            }
        }
        tracing::debug!("no faces located with any profile");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_relax_monotonically() {
        for pair in DETECTION_PROFILES.windows(2) {
            assert!(pair[1].min_face_size <= pair[0].min_face_size);
            assert!(pair[1].score_threshold <= pair[0].score_threshold);
            assert!(pair[1].pyramid_scale >= pair[0].pyramid_scale);
            assert!(pair[1].window_step <= pair[0].window_step);
        }
    }

    #[test]
    fn test_strictest_profile_first() {
        assert_eq!(DETECTION_PROFILES[0].min_face_size, 80);
        assert_eq!(DETECTION_PROFILES[0].score_threshold, 4.0);
    }

    #[test]
    fn test_profiles_respect_cascade_floor() {
        for profile in &DETECTION_PROFILES {
            assert!(profile.min_face_size >= CASCADE_WINDOW_FLOOR);
            assert!(profile.pyramid_scale > 0.01 && profile.pyramid_scale < 0.99);
            assert!(profile.window_step > 0);
        }
    }

    #[test]
    fn test_missing_model_is_reported() {
        let err = SeetaLocator::load("/nonexistent/model.bin").unwrap_err();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
        assert!(err.to_string().contains("models/"));
    }
}
