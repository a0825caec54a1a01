//! visionmate-service — Face enrollment, training and recognition service.
//!
//! Wires a [`visionmate_core::Detector`] and [`visionmate_core::Classifier`]
//! to durable state: a per-identity sample store, the identity registry and
//! the persisted model artifact.

pub mod artifact;
pub mod config;
mod durable;
pub mod error;
pub mod handle;
pub mod registry;
pub mod samples;
pub mod service;

#[cfg(test)]
mod testing;

pub use artifact::{ArtifactHeader, ModelArtifact};
pub use config::{Config, ConfigError};
pub use error::{ErrorKind, ServiceError, StoreError};
pub use handle::ServiceHandle;
pub use registry::IdentityRegistry;
pub use samples::SampleStore;
pub use service::{
    Enrollment, RecognitionService, ServiceOptions, ServiceState, ServiceStatus, TrainStats,
};
