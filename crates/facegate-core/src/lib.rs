//! facegate-core — face pipeline for event attendance checks.
//!
//! Detects faces with SCRFD, aligns them to the canonical ArcFace crop and
//! extracts 512-dimensional embeddings, all via ONNX Runtime on CPU.

pub mod alignment;
pub mod detector;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding, EuclideanMatcher, FaceMatch, FaceRecord, Matcher};

use std::path::PathBuf;

/// Default directory searched for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}
