use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the normalized face patch, in pixels.
pub const TEMPLATE_SIZE: u32 = 200;

/// Bounding box for a located face, in frame coordinates.
///
/// Coordinates are signed because permissive detection profiles may place
/// the box partially outside the frame; extraction clamps before cropping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Detector score for this candidate. Scale is detector-specific.
    pub score: f32,
}

impl FaceBox {
    /// Box area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Error)]
#[error("template patch must be {expected} bytes, got {actual}")]
pub struct BadTemplateSize {
    pub expected: usize,
    pub actual: usize,
}

/// Fixed-size grayscale face patch — the unit of comparison.
///
/// Always exactly `TEMPLATE_SIZE` × `TEMPLATE_SIZE` intensity bytes,
/// row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pixels: Vec<u8>,
}

impl Template {
    /// Build a template from a raw patch, rejecting wrong-sized data.
    pub fn from_pixels(pixels: Vec<u8>) -> Result<Self, BadTemplateSize> {
        let expected = (TEMPLATE_SIZE * TEMPLATE_SIZE) as usize;
        if pixels.len() != expected {
            return Err(BadTemplateSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels })
    }

    /// Row-major intensity bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Zero-mean normalized cross-correlation against another template.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. A flat
    /// (zero-variance) patch scores 0.0 against anything, since correlation
    /// is undefined there.
    pub fn similarity(&self, other: &Template) -> f32 {
        let n = self.pixels.len() as f64;
        let mean_a = self.pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
        let mean_b = other.pixels.iter().map(|&p| p as f64).sum::<f64>() / n;

        let mut cross = 0.0f64;
        let mut var_a = 0.0f64;
        let mut var_b = 0.0f64;

        for (&a, &b) in self.pixels.iter().zip(other.pixels.iter()) {
            let da = a as f64 - mean_a;
            let db = b as f64 - mean_b;
            cross += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let denom = (var_a * var_b).sqrt();
        if denom > 0.0 {
            (cross / denom) as f32
        } else {
            0.0
        }
    }
}

/// The primary enrolled template for one identity, with its metadata.
#[derive(Debug, Clone)]
pub struct FaceTemplate {
    pub identity: String,
    pub template: Template,
    pub enrolled_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Opaque enrollment-source descriptor supplied by the caller.
    pub metadata: serde_json::Value,
}

/// Result of matching a probe template against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Best zero-mean NCC score found, in [-1, 1].
    pub score: f32,
    /// Identity of the best match, when `matched`.
    pub identity: Option<String>,
}

/// Strategy for comparing a probe template against the enrolled gallery.
pub trait TemplateMatcher {
    fn compare(&self, probe: &Template, gallery: &[&FaceTemplate], threshold: f32) -> MatchResult;
}

/// Normalized cross-correlation matcher.
///
/// Scores every gallery entry (no early exit) and keeps the strict maximum;
/// ties resolve to the earliest gallery position, so iteration order decides
/// them deterministically.
pub struct NccMatcher;

impl TemplateMatcher for NccMatcher {
    fn compare(&self, probe: &Template, gallery: &[&FaceTemplate], threshold: f32) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let score = probe.similarity(&record.template);
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_score >= threshold => MatchResult {
                matched: true,
                score: best_score,
                identity: Some(gallery[idx].identity.clone()),
            },
            _ => MatchResult {
                matched: false,
                score: if best_score == f32::NEG_INFINITY { 0.0 } else { best_score },
                identity: None,
            },
        }
    }
}
