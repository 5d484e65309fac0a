//! Detection + embedding behind one trait.

use crate::detector::{DetectorConfig, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// A face seen in one image: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct ObservedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Finds faces in a grayscale image and embeds each of them.
///
/// Faces come back most confident first; callers that want a single face
/// take the first entry.
pub trait FaceEngine {
    fn analyze(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<ObservedFace>, EngineError>;
}

/// SCRFD + ArcFace engine.
pub struct OnnxFaceEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEngine {
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(detector_model, DetectorConfig::default())?;
        let recognizer = FaceRecognizer::load(recognizer_model)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn analyze(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<ObservedFace>, EngineError> {
        let faces = self.detector.detect(pixels, width, height)?;

        let mut observed = Vec::with_capacity(faces.len());
        for bbox in faces {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(pixels, width, height, &bbox)?;
            observed.push(ObservedFace { bbox, embedding });
        }
        Ok(observed)
    }
}
