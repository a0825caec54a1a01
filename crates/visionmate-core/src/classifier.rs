//! Face classifier capability.
//!
//! A classifier learns a mapping from canonical-size grayscale face crops to
//! integer identity labels, then scores new crops against it. Scores are
//! distances: lower means a closer match.

use crate::types::Prediction;
use image::GrayImage;
use thiserror::Error;

/// Minimum number of labeled samples any classifier will be trained on.
pub const MIN_TRAINING_SAMPLES: usize = 2;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("need at least {MIN_TRAINING_SAMPLES} samples to train, got {0}")]
    TooFewSamples(usize),
    #[error("{faces} faces but {labels} labels")]
    LabelMismatch { faces: usize, labels: usize },
    #[error("face is {actual:?}, model expects {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("model contains no samples")]
    EmptyModel,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("model encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("classifier failed: {0}")]
    Internal(String),
}

/// Trainable face classifier.
///
/// Implementations must be shareable across threads: the recognition service
/// calls `predict` concurrently from many callers while a single caller runs
/// `fit` for the next model.
pub trait Classifier: Send + Sync {
    /// Trained state. Immutable once produced.
    type Model: Send + Sync + 'static;

    /// Train a fresh model from scratch on the full batch.
    fn fit(&self, faces: &[GrayImage], labels: &[u32]) -> Result<Self::Model, ClassifierError>;

    /// Score one crop, returning the best label and its distance.
    fn predict(&self, model: &Self::Model, face: &GrayImage) -> Result<Prediction, ClassifierError>;

    fn serialize(&self, model: &Self::Model) -> Result<Vec<u8>, ClassifierError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Model, ClassifierError>;
}
