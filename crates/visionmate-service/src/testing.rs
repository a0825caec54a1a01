//! Stub detectors, classifiers and synthetic faces shared by unit tests.

use crate::artifact::ModelArtifact;
use crate::registry::IdentityRegistry;
use crate::samples::SampleStore;
use crate::service::{RecognitionService, ServiceOptions};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use visionmate_core::{
    crop_face, to_gray, Classifier, ClassifierError, Detector, DetectorError, FaceBox,
    LbphClassifier, LbphModel, Prediction,
};

pub const FRAME_WIDTH: u32 = 480;
pub const FRAME_HEIGHT: u32 = 240;
/// Exactly 200×200, so crops need no resampling.
pub const ARIA_BOX: FaceBox = FaceBox { top: 20, right: 220, bottom: 220, left: 20 };
pub const SECOND_BOX: FaceBox = FaceBox { top: 20, right: 460, bottom: 220, left: 260 };

/// Reports the same boxes for every frame.
pub struct FixedDetector {
    faces: Vec<FaceBox>,
}

impl FixedDetector {
    pub fn new(faces: Vec<FaceBox>) -> Self {
        Self { faces }
    }

    pub fn one(face: FaceBox) -> Self {
        Self::new(vec![face])
    }

    pub fn none() -> Self {
        Self::new(Vec::new())
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        Ok(self.faces.clone())
    }
}

/// LBPH that counts predict calls.
#[derive(Default)]
pub struct CountingClassifier {
    inner: LbphClassifier,
    pub predictions: Arc<AtomicUsize>,
}

impl Classifier for CountingClassifier {
    type Model = LbphModel;

    fn fit(&self, faces: &[GrayImage], labels: &[u32]) -> Result<LbphModel, ClassifierError> {
        self.inner.fit(faces, labels)
    }

    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(model, face)
    }

    fn serialize(&self, model: &LbphModel) -> Result<Vec<u8>, ClassifierError> {
        self.inner.serialize(model)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<LbphModel, ClassifierError> {
        self.inner.deserialize(bytes)
    }
}

/// LBPH with switchable failures.
#[derive(Default)]
pub struct FaultyClassifier {
    inner: LbphClassifier,
    pub fail_fit: Arc<AtomicBool>,
    /// When set, every second predict call fails.
    pub fail_every_other_predict: Arc<AtomicBool>,
    calls: AtomicUsize,
}

impl Classifier for FaultyClassifier {
    type Model = LbphModel;

    fn fit(&self, faces: &[GrayImage], labels: &[u32]) -> Result<LbphModel, ClassifierError> {
        if self.fail_fit.load(Ordering::SeqCst) {
            return Err(ClassifierError::Internal("injected fit failure".into()));
        }
        self.inner.fit(faces, labels)
    }

    fn predict(&self, model: &LbphModel, face: &GrayImage) -> Result<Prediction, ClassifierError> {
        if self.fail_every_other_predict.load(Ordering::SeqCst)
            && self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1
        {
            return Err(ClassifierError::Internal("injected predict failure".into()));
        }
        self.inner.predict(model, face)
    }

    fn serialize(&self, model: &LbphModel) -> Result<Vec<u8>, ClassifierError> {
        self.inner.serialize(model)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<LbphModel, ClassifierError> {
        self.inner.deserialize(bytes)
    }
}

/// Predicts one label at one distance for every face.
pub struct FixedDistanceClassifier {
    pub label: u32,
    pub distance: f64,
}

impl Classifier for FixedDistanceClassifier {
    type Model = ();

    fn fit(&self, _faces: &[GrayImage], _labels: &[u32]) -> Result<(), ClassifierError> {
        Ok(())
    }

    fn predict(&self, _model: &(), _face: &GrayImage) -> Result<Prediction, ClassifierError> {
        Ok(Prediction {
            label: self.label,
            distance: self.distance,
        })
    }

    fn serialize(&self, _model: &()) -> Result<Vec<u8>, ClassifierError> {
        Ok(b"fixed".to_vec())
    }

    fn deserialize(&self, _bytes: &[u8]) -> Result<(), ClassifierError> {
        Ok(())
    }
}

fn texture(seed: u32, x: u32, y: u32) -> u8 {
    let mut h = seed.wrapping_mul(0x9E37_79B1) ^ x.wrapping_mul(0x85EB_CA6B) ^ y.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    (h & 0xff) as u8
}

/// A frame whose texture is unique to `seed`.
pub fn face_image(seed: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        Luma([texture(seed, x, y)])
    }))
}

/// Face 1 texture on the left half, face 2 on the right.
pub fn two_face_image() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(FRAME_WIDTH, FRAME_HEIGHT, |x, y| {
        let seed = if x < FRAME_WIDTH / 2 { 1 } else { 2 };
        Luma([texture(seed, x, y)])
    }))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn open_service<D: Detector, C: Classifier>(
    dir: &Path,
    detector: D,
    classifier: C,
) -> RecognitionService<D, C> {
    RecognitionService::open(
        detector,
        classifier,
        IdentityRegistry::load(dir.join("users.json")),
        SampleStore::new(dir.join("dataset")),
        ModelArtifact::new(dir.join("model.lbph")),
        ServiceOptions::default(),
    )
}

/// Store the `ARIA_BOX` crop of `face_image(seed)` for each `(identity, seed)`.
pub fn seed_samples<D: Detector, C: Classifier>(service: &RecognitionService<D, C>, entries: &[(u32, u32)]) {
    for &(identity_id, seed) in entries {
        let gray = to_gray(&face_image(seed));
        let crop = crop_face(&gray, &ARIA_BOX, 200).unwrap();
        service.samples().add_sample(identity_id, &crop).unwrap();
    }
}
