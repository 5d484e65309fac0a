//! rollcall-core — face detection, embedding and identity matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on the CPU. The gallery loader and matcher only see the
//! [`FaceEngine`] trait, so they can be driven by any detector.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use detector::FaceDetector;
pub use engine::{EngineError, FaceEngine, ObservedFace, OnnxFaceEngine};
pub use gallery::{Gallery, GalleryError, GalleryLoad, GalleryWarning, Identity};
pub use matcher::{CosineMatcher, EuclideanMatcher, MatchOutcome, Matcher};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, Embedding};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default location of the ONNX models: `$XDG_DATA_HOME/rollcall/models`,
/// falling back to `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
