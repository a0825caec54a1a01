//! visionmate-core — Face detection and classification capabilities.
//!
//! Provides the [`Detector`] and [`Classifier`] contracts the recognition
//! service is built on, an SCRFD detector running via ONNX Runtime, and an
//! LBPH texture classifier.

pub mod classifier;
pub mod crop;
pub mod detector;
pub mod lbph;
pub mod types;

pub use classifier::{Classifier, ClassifierError, MIN_TRAINING_SAMPLES};
pub use crop::{crop_face, decode_image, to_gray, CANONICAL_FACE_SIZE};
pub use detector::{Detector, DetectorError, ScrfdDetector, ScrfdOptions};
pub use lbph::{LbphClassifier, LbphModel, LbphParams};
pub use types::{FaceBox, Identity, Prediction, RecognitionResult};
