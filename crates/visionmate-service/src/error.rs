use std::path::PathBuf;
use thiserror::Error;
use visionmate_core::{ClassifierError, DetectorError, MIN_TRAINING_SAMPLES};

/// Failure reading or writing durable state (samples, registry, artifact).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
    #[error("corrupt {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no face detected in enrollment image")]
    NoFaceDetected,
    #[error("insufficient training data: {found} sample(s), need at least {MIN_TRAINING_SAMPLES}")]
    InsufficientData { found: usize },
    #[error("classifier failure: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("detector failure: {0}")]
    Detector(#[from] DetectorError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Caller-facing error category, stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoFaceDetected,
    InsufficientData,
    ClassifierFailure,
    DetectorFailure,
    PersistenceFailure,
    MalformedInput,
    ServiceUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFaceDetected => "no_face_detected",
            Self::InsufficientData => "insufficient_data",
            Self::ClassifierFailure => "classifier_failure",
            Self::DetectorFailure => "detector_failure",
            Self::PersistenceFailure => "persistence_failure",
            Self::MalformedInput => "malformed_input",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFaceDetected => ErrorKind::NoFaceDetected,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::Classifier(_) => ErrorKind::ClassifierFailure,
            Self::Detector(_) => ErrorKind::DetectorFailure,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::Unavailable(_) => ErrorKind::ServiceUnavailable,
        }
    }
}
