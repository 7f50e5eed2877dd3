use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the registry index and template files.
    pub data_dir: PathBuf,
    /// Directory containing the SeetaFace detection model.
    pub model_dir: PathBuf,
    /// Match threshold on the normalized [0, 1] confidence scale.
    pub match_threshold: f32,
    /// Engine request queue depth.
    pub queue_depth: usize,
}

impl Config {
    /// Load configuration from `KENAL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("KENAL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("kenal")
            });

        let model_dir = std::env::var("KENAL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        Self {
            data_dir,
            model_dir,
            match_threshold: env_f32("KENAL_MATCH_THRESHOLD", 0.80),
            queue_depth: env_usize("KENAL_QUEUE_DEPTH", 4),
        }
    }

    /// Path to the SeetaFace frontal detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("seeta_fd_frontal_v1.0.bin")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
