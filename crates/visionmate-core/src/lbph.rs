//! Local Binary Patterns Histograms (LBPH) face classifier.
//!
//! Each crop is turned into a circular LBP code image, split into a grid of
//! cells, and summarized as one normalized histogram per cell. Prediction is
//! nearest-neighbor over the stored training histograms using the symmetric
//! chi-square distance.

use crate::classifier::{Classifier, ClassifierError, MIN_TRAINING_SAMPLES};
use crate::types::Prediction;
use image::GrayImage;
use serde::{Deserialize, Serialize};

const LBP_EPSILON: f64 = 1e-6;
const CHI_SQUARE_EPSILON: f64 = 1e-10;
/// Largest neighbor count accepted; 2^16 bins per cell is already generous.
const MAX_NEIGHBORS: u32 = 16;

/// LBPH operator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.radius == 0 {
            return Err(ClassifierError::InvalidParameters("radius must be >= 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(ClassifierError::InvalidParameters(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ClassifierError::InvalidParameters("grid must be at least 1x1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabeledHistogram {
    label: u32,
    histogram: Vec<f32>,
}

/// Trained LBPH state: one spatial histogram per training crop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    face_size: (u32, u32),
    samples: Vec<LabeledHistogram>,
}

impl LbphModel {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Distinct labels in ascending order.
    pub fn labels(&self) -> Vec<u32> {
        let mut labels: Vec<u32> = self.samples.iter().map(|s| s.label).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

/// LBPH classifier with fixed operator parameters.
#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    params: LbphParams,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self { params })
    }

    fn histogram(&self, face: &GrayImage) -> Result<Vec<f32>, ClassifierError> {
        let codes = lbp_codes(face, &self.params)?;
        spatial_histogram(&codes, &self.params)
    }
}

impl Classifier for LbphClassifier {
    type Model = LbphModel;

    fn fit(&self, faces: &[GrayImage], labels: &[u32]) -> Result<LbphModel, ClassifierError> {
        if faces.len() != labels.len() {
            return Err(ClassifierError::LabelMismatch {
                faces: faces.len(),
                labels: labels.len(),
            });
        }
        if faces.len() < MIN_TRAINING_SAMPLES {
            return Err(ClassifierError::TooFewSamples(faces.len()));
        }

        let face_size = faces[0].dimensions();
        let mut samples = Vec::with_capacity(faces.len());
        for (face, &label) in faces.iter().zip(labels) {
            if face.dimensions() != face_size {
                return Err(ClassifierError::SizeMismatch {
                    expected: face_size,
                    actual: face.dimensions(),
                });
            }
            samples.push(LabeledHistogram {
                label,
                histogram: self.histogram(face)?,
            });
        }

        let model = LbphModel {
            params: self.params,
            face_size,
            samples,
        };
        tracing::debug!(
            samples = model.sample_count(),
            labels = model.labels().len(),
            ?face_size,
            "LBPH model fitted"
        );
        Ok(model)
    }

    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        if face.dimensions() != model.face_size {
            return Err(ClassifierError::SizeMismatch {
                expected: model.face_size,
                actual: face.dimensions(),
            });
        }

        // Histograms must come from the operator the model was trained with.
        let codes = lbp_codes(face, &model.params)?;
        let probe = spatial_histogram(&codes, &model.params)?;

        let mut best: Option<Prediction> = None;
        for sample in &model.samples {
            let distance = chi_square(&sample.histogram, &probe);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }

        best.ok_or(ClassifierError::EmptyModel)
    }

    fn serialize(&self, model: &LbphModel) -> Result<Vec<u8>, ClassifierError> {
        Ok(serde_json::to_vec(model)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<LbphModel, ClassifierError> {
        let model: LbphModel = serde_json::from_slice(bytes)?;
        model.params.validate()?;

        let bins = model.params.bins() * (model.params.grid_x * model.params.grid_y) as usize;
        if let Some(bad) = model.samples.iter().find(|s| s.histogram.len() != bins) {
            return Err(ClassifierError::Internal(format!(
                "histogram for label {} has {} bins, expected {bins}",
                bad.label,
                bad.histogram.len()
            )));
        }
        Ok(model)
    }
}

/// Circular LBP code image, `2 * radius` smaller than the input on each axis.
///
/// Neighbor intensities are bilinearly interpolated on a circle of `radius`
/// around each pixel; bit `n` is set when neighbor `n` is >= the center.
fn lbp_codes(face: &GrayImage, params: &LbphParams) -> Result<Vec<Vec<u32>>, ClassifierError> {
    let (width, height) = face.dimensions();
    let r = params.radius as i64;
    let out_w = width as i64 - 2 * r;
    let out_h = height as i64 - 2 * r;
    if out_w < params.grid_x as i64 || out_h < params.grid_y as i64 {
        return Err(ClassifierError::InvalidParameters(format!(
            "face {width}x{height} too small for radius {} and {}x{} grid",
            params.radius, params.grid_x, params.grid_y
        )));
    }

    let px = |x: i64, y: i64| face.get_pixel(x as u32, y as u32)[0] as f64;
    let mut codes = vec![vec![0u32; out_w as usize]; out_h as usize];

    for n in 0..params.neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / params.neighbors as f64;
        let x = params.radius as f64 * angle.cos();
        let y = -(params.radius as f64) * angle.sin();

        let (fx, fy) = (x.floor() as i64, y.floor() as i64);
        let (cx, cy) = (x.ceil() as i64, y.ceil() as i64);
        let tx = x - fx as f64;
        let ty = y - fy as f64;
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in r..height as i64 - r {
            for j in r..width as i64 - r {
                let center = px(j, i);
                let t = w1 * px(j + fx, i + fy)
                    + w2 * px(j + cx, i + fy)
                    + w3 * px(j + fx, i + cy)
                    + w4 * px(j + cx, i + cy);
                if t > center || (t - center).abs() < LBP_EPSILON {
                    codes[(i - r) as usize][(j - r) as usize] |= 1 << n;
                }
            }
        }
    }

    Ok(codes)
}

/// Concatenated per-cell histograms, each normalized by its cell's pixel count.
fn spatial_histogram(codes: &[Vec<u32>], params: &LbphParams) -> Result<Vec<f32>, ClassifierError> {
    let rows = codes.len();
    let cols = codes.first().map_or(0, Vec::len);
    let cell_h = rows / params.grid_y as usize;
    let cell_w = cols / params.grid_x as usize;
    if cell_h == 0 || cell_w == 0 {
        return Err(ClassifierError::InvalidParameters(format!(
            "{cols}x{rows} code image cannot be split into a {}x{} grid",
            params.grid_x, params.grid_y
        )));
    }

    let bins = params.bins();
    let cell_total = (cell_h * cell_w) as f32;
    let mut histogram = vec![0.0f32; bins * (params.grid_x * params.grid_y) as usize];

    for gy in 0..params.grid_y as usize {
        for gx in 0..params.grid_x as usize {
            let offset = (gy * params.grid_x as usize + gx) * bins;
            let cell = &mut histogram[offset..offset + bins];
            for row in &codes[gy * cell_h..(gy + 1) * cell_h] {
                for &code in &row[gx * cell_w..(gx + 1) * cell_w] {
                    cell[code as usize] += 1.0;
                }
            }
            for bin in cell.iter_mut() {
                *bin /= cell_total;
            }
        }
    }

    Ok(histogram)
}

/// Symmetric chi-square distance: `Σ 2(a-b)² / (a+b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let sum = a + b;
            if sum > CHI_SQUARE_EPSILON {
                2.0 * (a - b) * (a - b) / sum
            } else {
                0.0
            }
        })
        .sum()
}
