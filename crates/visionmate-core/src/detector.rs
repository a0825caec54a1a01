//! Face detector capability and the SCRFD implementation.
//!
//! SCRFD runs via ONNX Runtime with 3-stride anchor decoding and NMS
//! post-processing. Boxes come back in `(top, right, bottom, left)` frame
//! coordinates, highest confidence first.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a grayscale frame.
///
/// The returned order must be stable for a given frame; callers treat the
/// first box as the primary face.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError>;
}

/// Thresholds applied after SCRFD inference.
#[derive(Debug, Clone, Copy)]
pub struct ScrfdOptions {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ScrfdOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// Scale and padding applied when letterboxing a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    /// Resized frame size inside the model input.
    new_w: u32,
    new_h: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            new_w,
            new_h,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a point from model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Raw detection in frame space before rounding to a [`FaceBox`].
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn to_face_box(self) -> FaceBox {
        FaceBox::new(
            self.y1.floor() as i32,
            self.x2.ceil() as i32,
            self.y2.ceil() as i32,
            self.x1.floor() as i32,
        )
    }
}

/// SCRFD-based face detector.
///
/// The ONNX session needs exclusive access per run, so concurrent callers
/// take turns on an internal lock.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    options: ScrfdOptions,
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, options: ScrfdOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        tracing::info!(path = %model_path.display(), outputs, "loaded SCRFD model");

        // Landmark outputs (kps) are optional; score + bbox per stride are not.
        if outputs < SCRFD_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs {SCRFD_OUTPUTS} score/bbox outputs, got {outputs}"
            )));
        }

        Ok(Self {
            session: Mutex::new(session),
            options,
        })
    }

    /// Letterbox the frame into a normalized 1×3×640×640 tensor.
    fn preprocess(frame: &GrayImage) -> (Array4<f32>, Letterbox) {
        let (width, height) = frame.dimensions();
        let letterbox = Letterbox::fit(width, height);
        let resized = imageops::resize(frame, letterbox.new_w, letterbox.new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        // Padding stays at 0.0, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = (pixel[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            if tx >= size || ty >= size {
                continue;
            }
            // Grayscale replicated into all three channels.
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = value;
            }
        }

        (tensor, letterbox)
    }
}

impl Detector for ScrfdDetector {
    fn detect(&self, frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(frame);

        let mut candidates = Vec::new();
        {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

            // Standard export order: [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
            for (i, &stride) in SCRFD_STRIDES.iter().enumerate() {
                let (_, scores) = outputs[i]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
                let (_, bboxes) = outputs[i + SCRFD_STRIDES.len()]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

                candidates.extend(decode_stride(
                    scores,
                    bboxes,
                    stride,
                    &letterbox,
                    self.options.confidence_threshold,
                ));
            }
        }

        let kept = nms(candidates, self.options.nms_threshold);
        tracing::debug!(faces = kept.len(), "SCRFD detection complete");

        Ok(kept.into_iter().map(Candidate::to_face_box).collect())
    }
}

/// Decode detections for one stride level into frame-space candidates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE as usize / stride;
    let grid_h = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * s;
            let ay = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - offsets[0] * s, ay - offsets[1] * s);
            let (x2, y2) = letterbox.unmap(ax + offsets[2] * s, ay + offsets[3] * s);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Non-maximum suppression; survivors are ordered by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    }
    .area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
