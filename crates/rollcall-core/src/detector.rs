//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by non-maximum
//! suppression. Input frames are grayscale; the single channel is replicated
//! into the three channels the model expects.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Score and overlap thresholds applied after inference.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Placement of the resized frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    inner_w: u32,
    inner_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, input: usize) -> Self {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let inner_w = ((width as f32 * scale).round() as u32).clamp(1, input as u32);
        let inner_h = ((height as f32 * scale).round() as u32).clamp(1, input as u32);
        Self {
            scale,
            pad_x: (input as u32 - inner_w) as f32 / 2.0,
            pad_y: (input as u32 - inner_h) as f32 / 2.0,
            inner_w,
            inner_h,
        }
    }

    /// Map a point in model-input space back to the source frame.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Raw tensors produced for one stride.
struct StrideTensors<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
    outputs: [StrideOutputs; 3],
    config: DetectorConfig,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let outputs = resolve_outputs(&output_names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_size: SCRFD_INPUT_SIZE,
            outputs,
            config,
        })
    }

    /// Detect faces in a grayscale frame, most confident first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = self.preprocess(frame, width, height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let idx = self.outputs[slot];
            let extract = |i: usize, what: &str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let tensors = StrideTensors {
                stride,
                scores: extract(idx.score, "scores")?,
                bboxes: extract(idx.bbox, "bboxes")?,
                kps: extract(idx.kps, "kps")?,
            };
            candidates.extend(decode_stride(
                &tensors,
                self.input_size,
                &letterbox,
                self.config.confidence_threshold,
            ));
        }

        Ok(non_max_suppression(candidates, self.config.nms_threshold))
    }

    /// Letterbox the frame into a normalized NCHW tensor.
    fn preprocess(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<(Array4<f32>, Letterbox), DetectorError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || frame.len() < expected {
            return Err(DetectorError::InvalidFrame { width, height });
        }
        let source = GrayImage::from_raw(width, height, frame[..expected].to_vec())
            .ok_or(DetectorError::InvalidFrame { width, height })?;

        let letterbox = Letterbox::fit(width, height, self.input_size);
        let resized = imageops::resize(
            &source,
            letterbox.inner_w,
            letterbox.inner_h,
            FilterType::Triangle,
        );

        // Padding uses the mean, which normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_size, self.input_size));
        let off_x = letterbox.pad_x.floor() as usize;
        let off_y = letterbox.pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = (x as usize + off_x, y as usize + off_y);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = value;
            }
        }

        Ok((tensor, letterbox))
    }
}

/// Map output tensors to stride slots.
///
/// Exports either name their outputs `score_8`, `bbox_16`, `kps_32`, ... or
/// use opaque numeric names, in which case the standard order applies:
/// scores 8/16/32, then bboxes, then keypoints.
fn resolve_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let by_name = |stride: usize| -> Option<StrideOutputs> {
        Some(StrideOutputs {
            score: find("score", stride)?,
            bbox: find("bbox", stride)?,
            kps: find("kps", stride)?,
        })
    };

    if let (Some(s8), Some(s16), Some(s32)) = (by_name(8), by_name(16), by_name(32)) {
        tracing::debug!("SCRFD: using name-based output mapping");
        return [s8, s16, s32];
    }

    tracing::debug!(?names, "SCRFD: output names not recognized, using positional mapping");
    std::array::from_fn(|i| StrideOutputs {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Decode the detections above `threshold` for one stride.
fn decode_stride(
    t: &StrideTensors<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / t.stride;
    let step = t.stride as f32;

    t.scores
        .iter()
        .take(grid * grid * SCRFD_ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let d = t.bboxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);

            let landmarks = t.kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| {
                    letterbox.to_source(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS; the survivors come back in descending confidence order.
fn non_max_suppression(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
