//! kenal-core — classical face identity pipeline.
//!
//! Decodes camera payloads, locates faces with a graduated funnel cascade,
//! normalizes face crops into fixed-size grayscale templates, and scores
//! templates against an enrolled gallery with normalized cross-correlation.

pub mod detector;
pub mod ingest;
pub mod quality;
pub mod template;
pub mod types;

pub use detector::{DetectorError, FaceLocator, SeetaLocator};
pub use ingest::DecodeError;
pub use quality::QualityReport;
pub use template::{extract_template, ExtractionError};
pub use types::{FaceBox, FaceTemplate, MatchResult, NccMatcher, Template, TemplateMatcher, TEMPLATE_SIZE};
