use kenal_core::detector::{FaceLocator, SeetaLocator};
use kenal_core::quality::{self, QualityReport};
use kenal_core::template;
use kenal_core::types::{NccMatcher, TemplateMatcher};
use kenal_core::ingest;
use kenal_store::TemplateStore;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] kenal_core::DetectorError),
    #[error("store error: {0}")]
    Store(#[from] kenal_store::StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment attempt.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub success: bool,
    pub message: String,
    /// Number of identities enrolled after the operation.
    pub enrolled_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_issues: Option<Vec<String>>,
}

impl EnrollOutcome {
    fn failure(message: &str, enrolled_count: usize, quality_issues: Option<Vec<String>>) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            enrolled_count,
            quality_issues,
        }
    }
}

/// Result of a recognition attempt. `confidence` is a 0–100 percentage;
/// the pipeline works on [0, 1] internally and converts only here.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub confidence: f32,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl RecognizeOutcome {
    fn failure(message: &str, confidence: f32) -> Self {
        Self {
            success: false,
            identity: None,
            confidence,
            message: message.to_string(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub version: String,
    pub enrolled_count: usize,
    pub store_dir: String,
    /// Default match threshold as a 0–100 percentage.
    pub match_threshold_pct: f32,
}

/// Messages sent from the D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        identity: String,
        payload: String,
        metadata: serde_json::Value,
        reply: oneshot::Sender<EnrollOutcome>,
    },
    Recognize {
        payload: String,
        /// Threshold override on the [0, 1] scale.
        threshold: Option<f32>,
        reply: oneshot::Sender<RecognizeOutcome>,
    },
    Validate {
        payload: String,
        reply: oneshot::Sender<QualityReport>,
    },
    List {
        reply: oneshot::Sender<Vec<String>>,
    },
    Delete {
        identity: String,
        reply: oneshot::Sender<DeleteOutcome>,
    },
    Status {
        reply: oneshot::Sender<StatusInfo>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn enroll(
        &self,
        identity: String,
        payload: String,
        metadata: serde_json::Value,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { identity, payload, metadata, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn recognize(
        &self,
        payload: String,
        threshold: Option<f32>,
    ) -> Result<RecognizeOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize { payload, threshold, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn validate(&self, payload: String) -> Result<QualityReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Validate { payload, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn list(&self) -> Result<Vec<String>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::List { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn delete(&self, identity: String) -> Result<DeleteOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Delete { identity, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<StatusInfo, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The detector and registry are constructed inside the engine thread (the
/// cascade is stateful and stays put); startup failures are reported back
/// before this function returns, so a missing model or unreadable registry
/// fails fast.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let model_path = config.detector_model_path();
    let data_dir = config.data_dir.clone();

    spawn_engine_with(config.queue_depth, config.match_threshold, move || {
        let locator = SeetaLocator::load(&model_path)?;
        let store = TemplateStore::open(data_dir)?;
        Ok((Box::new(locator) as Box<dyn FaceLocator>, store))
    })
}

pub(crate) fn spawn_engine_with<F>(
    queue_depth: usize,
    default_threshold: f32,
    init: F,
) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<(Box<dyn FaceLocator>, TemplateStore), EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), EngineError>>();

    std::thread::Builder::new()
        .name("kenal-engine".into())
        .spawn(move || {
            let (mut locator, mut store) = match init() {
                Ok(resources) => {
                    let _ = init_tx.send(Ok(()));
                    resources
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Enroll { identity, payload, metadata, reply } => {
                        let outcome =
                            run_enroll(locator.as_mut(), &mut store, &identity, &payload, metadata);
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Recognize { payload, threshold, reply } => {
                        let outcome = run_recognize(
                            locator.as_mut(),
                            &mut store,
                            &payload,
                            threshold.unwrap_or(default_threshold),
                        );
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Validate { payload, reply } => {
                        let _ = reply.send(run_validate(locator.as_mut(), &payload));
                    }
                    EngineRequest::List { reply } => {
                        let _ = reply.send(store.identities());
                    }
                    EngineRequest::Delete { identity, reply } => {
                        let _ = reply.send(run_delete(&mut store, &identity));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(StatusInfo {
                            version: env!("CARGO_PKG_VERSION").to_string(),
                            enrolled_count: store.len(),
                            store_dir: store.dir().display().to_string(),
                            match_threshold_pct: default_threshold * 100.0,
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    init_rx.recv().map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}

/// Negative correlations carry no identity signal; they clamp to zero at
/// the caller-facing percentage boundary.
fn to_percent(score: f32) -> f32 {
    (score.max(0.0) * 100.0).min(100.0)
}

/// Ingest → locate → quality gate → extract → replace in registry.
fn run_enroll(
    locator: &mut dyn FaceLocator,
    store: &mut TemplateStore,
    identity: &str,
    payload: &str,
    metadata: serde_json::Value,
) -> EnrollOutcome {
    let frame = match ingest::decode_payload(payload) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(identity, error = %err, "enroll: payload rejected");
            return EnrollOutcome::failure("Invalid image data", store.len(), None);
        }
    };

    let faces = locator.locate(&frame);
    let report = quality::assess(&frame, &faces);
    if !report.valid {
        tracing::info!(identity, reason = %report.message, "enroll: capture rejected");
        return EnrollOutcome::failure(&report.message, store.len(), Some(report.suggestions));
    }

    let template = match template::extract_template(&frame, &faces[0]) {
        Ok(template) => template,
        Err(err) => {
            tracing::error!(identity, error = %err, "enroll: face region extraction failed");
            return EnrollOutcome::failure("Could not extract the face region", store.len(), None);
        }
    };

    if let Err(err) = store.enroll(identity, template, metadata) {
        tracing::error!(identity, error = %err, "enroll: registry write failed");
        return EnrollOutcome::failure("Registry is unavailable", store.len(), None);
    }

    EnrollOutcome {
        success: true,
        message: format!("Face enrolled for {identity}"),
        enrolled_count: store.len(),
        quality_issues: None,
    }
}

/// Ingest → locate → extract → score against every enrolled template.
fn run_recognize(
    locator: &mut dyn FaceLocator,
    store: &mut TemplateStore,
    payload: &str,
    threshold: f32,
) -> RecognizeOutcome {
    if store.is_empty() {
        return RecognizeOutcome::failure("No identities enrolled", 0.0);
    }

    let frame = match ingest::decode_payload(payload) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(error = %err, "recognize: payload rejected");
            return RecognizeOutcome::failure("Invalid image data", 0.0);
        }
    };

    let faces = locator.locate(&frame);
    let Some(face) = faces.first() else {
        return RecognizeOutcome::failure("No face detected in the capture", 0.0);
    };

    let probe = match template::extract_template(&frame, face) {
        Ok(probe) => probe,
        Err(err) => {
            tracing::error!(error = %err, "recognize: face region extraction failed");
            return RecognizeOutcome::failure("Could not extract the face region", 0.0);
        }
    };

    let result = {
        let gallery = store.records();
        NccMatcher.compare(&probe, &gallery, threshold)
    };

    match result.identity {
        Some(identity) if result.matched => {
            let metadata = store
                .get(&identity)
                .map(|record| record.metadata.clone())
                .unwrap_or(serde_json::Value::Null);
            if let Err(err) = store.touch(&identity) {
                tracing::warn!(identity = %identity, error = %err, "failed to record match time");
            }
            tracing::info!(identity = %identity, score = result.score, "face recognized");
            RecognizeOutcome {
                success: true,
                confidence: to_percent(result.score),
                message: format!("Face recognized as {identity}"),
                metadata,
                identity: Some(identity),
            }
        }
        _ => {
            tracing::info!(best_score = result.score, "no confident match");
            RecognizeOutcome::failure(
                "Face not recognized or confidence too low",
                to_percent(result.score),
            )
        }
    }
}

fn run_validate(locator: &mut dyn FaceLocator, payload: &str) -> QualityReport {
    match ingest::decode_payload(payload) {
        Ok(frame) => {
            let faces = locator.locate(&frame);
            quality::assess(&frame, &faces)
        }
        Err(err) => {
            tracing::warn!(error = %err, "validate: payload rejected");
            QualityReport::reject(
                "Invalid image data",
                &["Retake the photo", "Check the capture format"],
            )
        }
    }
}

fn run_delete(store: &mut TemplateStore, identity: &str) -> DeleteOutcome {
    match store.remove(identity) {
        Ok(true) => DeleteOutcome {
            success: true,
            message: format!("Identity {identity} removed"),
        },
        Ok(false) => DeleteOutcome {
            success: false,
            message: format!("Identity {identity} is not enrolled"),
        },
        Err(err) => {
            tracing::error!(identity, error = %err, "delete: registry write failed");
            DeleteOutcome {
                success: false,
                message: "Registry is unavailable".to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{GrayImage, Luma};
    use kenal_core::types::FaceBox;
    use tempfile::TempDir;

    const THRESHOLD: f32 = 0.80;

    struct StubLocator {
        boxes: Vec<FaceBox>,
    }

    impl FaceLocator for StubLocator {
        fn locate(&mut self, _frame: &GrayImage) -> Vec<FaceBox> {
            self.boxes.clone()
        }
    }

    fn one_face() -> StubLocator {
        StubLocator { boxes: vec![face_box(25, 25, 50)] }
    }

    fn face_box(x: i32, y: i32, side: u32) -> FaceBox {
        FaceBox { x, y, width: side, height: side, score: 4.2 }
    }

    fn encode(img: &GrayImage) -> String {
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("png encode");
        base64::engine::general_purpose::STANDARD.encode(&buf)
    }

    /// 100×100 textured capture that passes every quality check.
    fn textured_payload() -> String {
        encode(&GrayImage::from_fn(100, 100, |x, y| {
            Luma([if (x + y) % 2 == 0 { 90 } else { 160 }])
        }))
    }

    fn flat_payload(level: u8) -> String {
        encode(&GrayImage::from_pixel(100, 100, Luma([level])))
    }

    fn temp_store() -> (TempDir, TemplateStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = TemplateStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn test_enroll_requires_a_face() {
        let (_dir, mut store) = temp_store();
        let mut locator = StubLocator { boxes: vec![] };

        let outcome = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        assert!(!outcome.success);
        assert!(outcome.message.contains("No face"));
        assert!(!outcome.quality_issues.unwrap().is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_enroll_rejects_multiple_faces() {
        let (_dir, mut store) = temp_store();
        let mut locator = StubLocator {
            boxes: vec![face_box(10, 10, 40), face_box(55, 10, 40)],
        };

        let outcome = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        assert!(!outcome.success);
        assert!(outcome.message.contains("More than one face"));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_enroll_rejects_small_face() {
        let (_dir, mut store) = temp_store();
        let mut locator = StubLocator { boxes: vec![face_box(45, 45, 10)] };

        let outcome = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        assert!(!outcome.success);
        assert!(outcome.message.contains("too small"));
        assert!(outcome.quality_issues.is_some());
    }

    #[test]
    fn test_enroll_rejects_undecodable_payload() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();

        let outcome = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            "!!!not-base64!!!",
            serde_json::Value::Null,
        );

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Invalid image data");
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_enroll_stores_template_and_metadata() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();

        let outcome = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::json!({"role": "penyuluh"}),
        );

        assert!(outcome.success, "failed: {}", outcome.message);
        assert_eq!(outcome.enrolled_count, 1);
        assert!(outcome.quality_issues.is_none());
        assert_eq!(
            store.get("alice").unwrap().metadata,
            serde_json::json!({"role": "penyuluh"})
        );
    }

    #[test]
    fn test_reenroll_is_idempotent_on_count() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();

        let first = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );
        let second = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        assert!(first.success && second.success);
        assert_eq!(second.enrolled_count, 1);
        assert_eq!(store.identities(), vec!["alice"]);
    }

    #[test]
    fn test_recognize_empty_registry_is_distinct() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();

        let outcome = run_recognize(&mut locator, &mut store, &textured_payload(), THRESHOLD);

        assert!(!outcome.success);
        assert_eq!(outcome.message, "No identities enrolled");
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_enroll_then_recognize_round_trip() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();
        let payload = textured_payload();

        let enrolled = run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &payload,
            serde_json::json!({"name": "Alice"}),
        );
        assert!(enrolled.success, "failed: {}", enrolled.message);

        let outcome = run_recognize(&mut locator, &mut store, &payload, THRESHOLD);

        assert!(outcome.success, "failed: {}", outcome.message);
        assert_eq!(outcome.identity.as_deref(), Some("alice"));
        assert!(outcome.confidence >= THRESHOLD * 100.0);
        assert_eq!(outcome.metadata, serde_json::json!({"name": "Alice"}));
        assert!(store.get("alice").unwrap().last_used.is_some());
    }

    #[test]
    fn test_recognize_unfamiliar_face_reports_best_score() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();

        run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        // A flat probe correlates with nothing.
        let outcome = run_recognize(&mut locator, &mut store, &flat_payload(125), THRESHOLD);

        assert!(!outcome.success);
        assert!(outcome.identity.is_none());
        assert!(outcome.confidence < THRESHOLD * 100.0);
        assert_eq!(outcome.message, "Face not recognized or confidence too low");
    }

    #[test]
    fn test_recognize_requires_a_face() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();
        run_enroll(
            &mut locator,
            &mut store,
            "alice",
            &textured_payload(),
            serde_json::Value::Null,
        );

        let mut no_face = StubLocator { boxes: vec![] };
        let outcome = run_recognize(&mut no_face, &mut store, &textured_payload(), THRESHOLD);

        assert!(!outcome.success);
        assert!(outcome.message.contains("No face"));
    }

    #[test]
    fn test_delete_removes_matchability() {
        let (_dir, mut store) = temp_store();
        let mut locator = one_face();
        let payload = textured_payload();

        run_enroll(&mut locator, &mut store, "alice", &payload, serde_json::Value::Null);

        let deleted = run_delete(&mut store, "alice");
        assert!(deleted.success);

        let again = run_delete(&mut store, "alice");
        assert!(!again.success);
        assert!(again.message.contains("not enrolled"));

        let outcome = run_recognize(&mut locator, &mut store, &payload, THRESHOLD);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "No identities enrolled");
    }

    #[test]
    fn test_validate_reports_pass_and_fail() {
        let mut locator = one_face();

        let good = run_validate(&mut locator, &textured_payload());
        assert!(good.valid, "rejected: {}", good.message);
        assert!(good.suggestions.is_empty());

        let bright = run_validate(&mut locator, &flat_payload(220));
        assert!(!bright.valid);
        assert!(bright.message.contains("too bright"));

        let garbage = run_validate(&mut locator, "???");
        assert!(!garbage.valid);
        assert_eq!(garbage.message, "Invalid image data");
        assert!(!garbage.suggestions.is_empty());
    }

    #[test]
    fn test_to_percent_clamps() {
        assert_eq!(to_percent(-0.4), 0.0);
        assert_eq!(to_percent(0.5), 50.0);
        assert_eq!(to_percent(1.0), 100.0);
    }

    #[tokio::test]
    async fn test_engine_handle_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let data_dir = dir.path().to_path_buf();

        let engine = spawn_engine_with(4, THRESHOLD, move || {
            let locator = StubLocator { boxes: vec![face_box(25, 25, 50)] };
            let store = TemplateStore::open(data_dir)?;
            Ok((Box::new(locator) as Box<dyn FaceLocator>, store))
        })
        .expect("spawn engine");

        let payload = textured_payload();

        let enrolled = engine
            .enroll("alice".into(), payload.clone(), serde_json::Value::Null)
            .await
            .unwrap();
        assert!(enrolled.success, "failed: {}", enrolled.message);

        assert_eq!(engine.list().await.unwrap(), vec!["alice"]);

        let status = engine.status().await.unwrap();
        assert_eq!(status.enrolled_count, 1);
        assert_eq!(status.match_threshold_pct, THRESHOLD * 100.0);

        let recognized = engine.recognize(payload, None).await.unwrap();
        assert!(recognized.success);
        assert_eq!(recognized.identity.as_deref(), Some("alice"));

        let deleted = engine.delete("alice".into()).await.unwrap();
        assert!(deleted.success);
        assert!(engine.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_spawn_engine_fails_fast_without_model() {
        let config = Config {
            data_dir: std::env::temp_dir().join("kenal-missing-model-test"),
            model_dir: "/nonexistent".into(),
            match_threshold: THRESHOLD,
            queue_depth: 4,
        };
        assert!(matches!(
            spawn_engine(&config),
            Err(EngineError::Detector(_))
        ));
    }
}
