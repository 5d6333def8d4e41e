use std::net::SocketAddr;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance between embeddings for a positive match.
    pub distance_threshold: f32,
    /// Maximum accepted request body size in bytes.
    pub max_upload_bytes: usize,
}

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:6010";
const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.6;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegate_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        let listen_addr = std::env::var("FACEGATE_LISTEN_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.parse().expect("default listen addr"));

        Self {
            listen_addr,
            model_dir,
            db_path,
            distance_threshold: env_f32("FACEGATE_DISTANCE_THRESHOLD", DEFAULT_DISTANCE_THRESHOLD),
            max_upload_bytes: env_usize("FACEGATE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
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
