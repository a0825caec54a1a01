//! Recognition service: enrollment, training and recognition over shared state.
//!
//! Any number of `recognize` calls run concurrently against the installed
//! model. `enroll` and `train` are serialized by one write lock; a new model
//! is persisted first, then swapped in, so callers only ever observe a
//! complete model.

use crate::artifact::{ArtifactHeader, ModelArtifact};
use crate::config::Config;
use crate::error::{ServiceError, StoreError};
use crate::registry::IdentityRegistry;
use crate::samples::SampleStore;
use image::{DynamicImage, GrayImage};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use visionmate_core::crop::resize_canonical;
use visionmate_core::types::fallback_name;
use visionmate_core::{
    crop_face, decode_image, to_gray, Classifier, Detector, Identity, RecognitionResult,
    MIN_TRAINING_SAMPLES,
};

/// Tunables the service needs from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceOptions {
    /// Maximum distance accepted as a known face.
    pub confidence_threshold: f64,
    pub max_samples_per_identity: usize,
    pub face_size: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&Config::with_data_dir(""))
    }
}

impl From<&Config> for ServiceOptions {
    fn from(config: &Config) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_samples_per_identity: config.max_samples_per_identity,
            face_size: config.face_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// No usable model; recognition returns nothing.
    Untrained,
    /// A training run is in progress; the previous model (if any) stays in use.
    Training,
    Trained,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrainStats {
    /// Samples loaded into the training batch.
    pub processed: usize,
    /// Sample files that could not be read.
    pub failed: usize,
    /// Identities contributing at least one sample.
    pub identities: usize,
}

/// Outcome of an enrollment whose sample was durably stored.
///
/// `training` carries the retrain result; an error there means the sample and
/// registry entry are saved but recognition still uses the previous model.
#[derive(Debug)]
pub struct Enrollment {
    pub identity: Identity,
    pub sample: PathBuf,
    pub training: Result<TrainStats, ServiceError>,
}

impl Enrollment {
    /// Sample saved but the model was not retrained.
    pub fn is_partial(&self) -> bool {
        self.training.is_err()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub identities: usize,
    pub confidence_threshold: f64,
    pub last_training: Option<TrainStats>,
}

/// Face recognition service over injected detector and classifier.
pub struct RecognitionService<D, C: Classifier> {
    detector: D,
    classifier: C,
    options: ServiceOptions,
    samples: SampleStore,
    artifact: ModelArtifact,
    registry: RwLock<IdentityRegistry>,
    model: RwLock<Option<Arc<C::Model>>>,
    /// Serializes enroll/train: sample writes, registry upserts, artifact
    /// replacement and the model swap.
    write_lock: Mutex<()>,
    training: AtomicBool,
    last_training: Mutex<Option<TrainStats>>,
}

/// Clears the training flag when a training run ends, however it ends.
struct TrainingFlag<'a>(&'a AtomicBool);

impl<'a> TrainingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for TrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<D: Detector, C: Classifier> RecognitionService<D, C> {
    /// Assemble the service and install the persisted model, if readable.
    ///
    /// An unreadable artifact is logged and the service starts untrained.
    pub fn open(
        detector: D,
        classifier: C,
        registry: IdentityRegistry,
        samples: SampleStore,
        artifact: ModelArtifact,
        options: ServiceOptions,
    ) -> Self {
        let model = match artifact.read() {
            Ok(Some((header, bytes))) => match classifier.deserialize(&bytes) {
                Ok(model) => {
                    tracing::info!(
                        path = %artifact.path().display(),
                        trained_at = %header.trained_at,
                        samples = header.samples,
                        identities = header.identities,
                        "loaded model artifact"
                    );
                    Some(Arc::new(model))
                }
                Err(e) => {
                    tracing::warn!(path = %artifact.path().display(), error = %e, "model artifact unusable; starting untrained");
                    None
                }
            },
            Ok(None) => {
                tracing::info!(path = %artifact.path().display(), "no model artifact; starting untrained");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "model artifact unreadable; starting untrained");
                None
            }
        };

        Self {
            detector,
            classifier,
            options,
            samples,
            artifact,
            registry: RwLock::new(registry),
            model: RwLock::new(model),
            write_lock: Mutex::new(()),
            training: AtomicBool::new(false),
            last_training: Mutex::new(None),
        }
    }

    /// Open with the paths and tunables from `config`.
    pub fn from_config(detector: D, classifier: C, config: &Config) -> Self {
        Self::open(
            detector,
            classifier,
            IdentityRegistry::load(&config.registry_path),
            SampleStore::new(&config.dataset_dir),
            ModelArtifact::new(&config.model_path),
            ServiceOptions::from(config),
        )
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    pub fn state(&self) -> ServiceState {
        if self.training.load(Ordering::SeqCst) {
            ServiceState::Training
        } else if self.model.read().is_some() {
            ServiceState::Trained
        } else {
            ServiceState::Untrained
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.state(),
            identities: self.registry.read().len(),
            confidence_threshold: self.options.confidence_threshold,
            last_training: *self.last_training.lock(),
        }
    }

    pub fn list_identities(&self) -> BTreeMap<u32, String> {
        self.registry.read().list()
    }

    pub fn next_identity_id(&self) -> u32 {
        self.registry.read().next_id()
    }

    /// Identify every detected face in `image`.
    ///
    /// Returns an empty list while untrained. A face the classifier fails on
    /// is reported as an `"Error"` entry; the other faces are unaffected.
    pub fn recognize(&self, image: &DynamicImage) -> Result<Vec<RecognitionResult>, ServiceError> {
        let Some(model) = self.current_model() else {
            tracing::debug!("recognize: untrained, skipping");
            return Ok(Vec::new());
        };

        let gray = to_gray(image);
        let faces = self.detector.detect(&gray)?;

        let mut results = Vec::with_capacity(faces.len());
        for face in faces {
            let Some(crop) = crop_face(&gray, &face, self.options.face_size) else {
                tracing::debug!(?face, "recognize: face box outside frame, skipping");
                continue;
            };

            let result = match self.classifier.predict(&model, &crop) {
                Ok(prediction) => RecognitionResult::from_prediction(
                    prediction,
                    self.options.confidence_threshold,
                    face,
                    |id| self.display_name(id),
                ),
                Err(e) => {
                    tracing::warn!(?face, error = %e, "recognize: prediction failed");
                    RecognitionResult::failed(face)
                }
            };
            tracing::debug!(
                identity_id = ?result.identity_id,
                name = %result.display_name,
                confidence = result.confidence,
                "recognize: face scored"
            );
            results.push(result);
        }

        Ok(results)
    }

    /// Decode an encoded image, then [`recognize`](Self::recognize) it.
    pub fn recognize_encoded(&self, bytes: &[u8]) -> Result<Vec<RecognitionResult>, ServiceError> {
        let image = decode(bytes)?;
        self.recognize(&image)
    }

    /// Enroll the first face in `image` as a new identity named `name`.
    pub fn enroll(&self, image: &DynamicImage, name: &str) -> Result<Enrollment, ServiceError> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock();
        let id = self.registry.read().next_id();
        self.enroll_locked(image, id, name)
    }

    /// Add a sample to identity `identity_id`, creating or renaming it.
    pub fn enroll_as(
        &self,
        image: &DynamicImage,
        identity_id: u32,
        name: &str,
    ) -> Result<Enrollment, ServiceError> {
        if identity_id == 0 {
            return Err(ServiceError::MalformedInput("identity id must be positive".into()));
        }
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock();
        self.enroll_locked(image, identity_id, name)
    }

    /// Decode an encoded image, then [`enroll`](Self::enroll) it.
    pub fn enroll_encoded(&self, bytes: &[u8], name: &str) -> Result<Enrollment, ServiceError> {
        let image = decode(bytes)?;
        self.enroll(&image, name)
    }

    /// Retrain from every stored sample and install the new model.
    pub fn train(&self, max_samples_per_identity: usize) -> Result<TrainStats, ServiceError> {
        let _guard = self.write_lock.lock();
        self.train_locked(max_samples_per_identity)
    }

    /// Train if no model is installed. Too few samples is not an error here.
    pub fn ensure_trained(&self) -> Result<Option<TrainStats>, ServiceError> {
        if self.state() != ServiceState::Untrained {
            return Ok(None);
        }
        match self.train(self.options.max_samples_per_identity) {
            Ok(stats) => Ok(Some(stats)),
            Err(ServiceError::InsufficientData { found }) => {
                tracing::info!(samples = found, "not enough samples to train yet");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn enroll_locked(
        &self,
        image: &DynamicImage,
        identity_id: u32,
        name: String,
    ) -> Result<Enrollment, ServiceError> {
        let gray = to_gray(image);
        let faces = self.detector.detect(&gray)?;
        let face = faces.first().ok_or(ServiceError::NoFaceDetected)?;
        if faces.len() > 1 {
            // Only the first face is enrolled.
            tracing::info!(ignored = faces.len() - 1, "enroll: extra faces ignored");
        }
        let crop =
            crop_face(&gray, face, self.options.face_size).ok_or(ServiceError::NoFaceDetected)?;

        let sample = self.samples.add_sample(identity_id, &crop)?;

        // Persist a copy first so readers never see an entry that failed to save.
        let mut registry = self.registry.read().clone();
        if let Err(e) = registry.upsert(identity_id, &name) {
            // An orphan sample would be trained under an id the registry may hand out again.
            if let Err(cleanup) = self.samples.remove_sample(&sample) {
                tracing::warn!(sample = %sample.display(), error = %cleanup, "could not remove sample after registry write failure");
            }
            return Err(e.into());
        }
        *self.registry.write() = registry;

        tracing::info!(identity_id, name = %name, sample = %sample.display(), "enrolled face sample");

        let training = self.train_locked(self.options.max_samples_per_identity);
        if let Err(e) = &training {
            tracing::warn!(identity_id, error = %e, "sample saved but retraining failed");
        }

        Ok(Enrollment {
            identity: Identity {
                id: identity_id,
                name,
            },
            sample,
            training,
        })
    }

    fn train_locked(&self, max_samples_per_identity: usize) -> Result<TrainStats, ServiceError> {
        let (faces, labels, stats) = self.collect_batch(max_samples_per_identity)?;
        if faces.len() < MIN_TRAINING_SAMPLES {
            return Err(ServiceError::InsufficientData { found: faces.len() });
        }

        let _flag = TrainingFlag::raise(&self.training);
        tracing::info!(
            samples = stats.processed,
            failed = stats.failed,
            identities = stats.identities,
            "training model"
        );

        let model = self.classifier.fit(&faces, &labels)?;
        let bytes = self.classifier.serialize(&model)?;
        self.artifact
            .write(&ArtifactHeader::new(stats.processed, stats.identities), &bytes)?;

        *self.model.write() = Some(Arc::new(model));
        *self.last_training.lock() = Some(stats);

        tracing::info!(samples = stats.processed, identities = stats.identities, "training complete");
        Ok(stats)
    }

    /// Load up to `limit` canonical-size crops per identity.
    fn collect_batch(&self, limit: usize) -> Result<(Vec<GrayImage>, Vec<u32>, TrainStats), StoreError> {
        let mut faces = Vec::new();
        let mut labels = Vec::new();
        let mut stats = TrainStats::default();

        for id in self.samples.identities()? {
            let mut loaded = 0;
            for path in self.samples.list_samples(id, limit)? {
                match self.samples.load_sample(&path) {
                    Ok(face) => {
                        faces.push(resize_canonical(face, self.options.face_size));
                        labels.push(id);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable sample");
                        stats.failed += 1;
                    }
                }
            }
            tracing::debug!(identity_id = id, samples = loaded, "collected training samples");
            stats.processed += loaded;
            if loaded > 0 {
                stats.identities += 1;
            }
        }

        Ok((faces, labels, stats))
    }

    fn current_model(&self) -> Option<Arc<C::Model>> {
        self.model.read().clone()
    }

    fn display_name(&self, id: u32) -> String {
        self.registry
            .read()
            .name(id)
            .map_or_else(|| fallback_name(id), str::to_string)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, ServiceError> {
    decode_image(bytes).map_err(|e| ServiceError::MalformedInput(format!("undecodable image: {e}")))
}

fn validate_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::MalformedInput("name must not be empty".into()));
    }
    Ok(name.to_string())
}
