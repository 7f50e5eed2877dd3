use crate::engine::{EngineError, EngineHandle};
use zbus::interface;

/// D-Bus interface for the Kenal face identity daemon.
///
/// Bus name: org.kenal.Kenal1
/// Object path: /org/kenal/Kenal1
///
/// Structured outcomes cross the bus as JSON strings; the wire format of
/// the surrounding portal is the caller's concern.
pub struct KenalService {
    engine: EngineHandle,
}

impl KenalService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn internal(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.kenal.Kenal1")]
impl KenalService {
    /// Enroll (or replace) the face template for an identity.
    /// `metadata` is an opaque JSON blob stored with the enrollment; pass
    /// an empty string for none.
    async fn enroll(
        &self,
        identity: String,
        payload: String,
        metadata: String,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = %identity, "enroll requested");
        let metadata = if metadata.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&metadata).map_err(|e| {
                zbus::fdo::Error::InvalidArgs(format!("metadata is not valid JSON: {e}"))
            })?
        };
        let outcome = self
            .engine
            .enroll(identity, payload, metadata)
            .await
            .map_err(internal)?;
        to_json(&outcome)
    }

    /// Recognize the face in a capture against all enrolled identities.
    /// `threshold_pct` is a 0–100 percentage; values <= 0 select the
    /// configured default.
    async fn recognize(&self, payload: String, threshold_pct: f64) -> zbus::fdo::Result<String> {
        tracing::info!("recognize requested");
        let threshold = if threshold_pct > 0.0 {
            Some((threshold_pct / 100.0) as f32)
        } else {
            None
        };
        let outcome = self
            .engine
            .recognize(payload, threshold)
            .await
            .map_err(internal)?;
        to_json(&outcome)
    }

    /// Check whether a capture is good enough to enroll.
    async fn validate_quality(&self, payload: String) -> zbus::fdo::Result<String> {
        let report = self.engine.validate(payload).await.map_err(internal)?;
        to_json(&report)
    }

    /// Enrolled identities in lexicographic order.
    async fn list_enrolled(&self) -> zbus::fdo::Result<Vec<String>> {
        self.engine.list().await.map_err(internal)
    }

    /// Remove an enrolled identity and its template.
    async fn delete(&self, identity: String) -> zbus::fdo::Result<String> {
        tracing::info!(identity = %identity, "delete requested");
        let outcome = self.engine.delete(identity).await.map_err(internal)?;
        to_json(&outcome)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(internal)?;
        to_json(&status)
    }
}
