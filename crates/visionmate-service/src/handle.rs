//! Async front for [`RecognitionService`].
//!
//! Enrollment and training run on one dedicated trainer thread fed by a
//! bounded channel; recognition runs on the blocking pool so it never waits
//! behind a training run.

use crate::error::ServiceError;
use crate::service::{Enrollment, RecognitionService, ServiceStatus, TrainStats};
use image::DynamicImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use visionmate_core::{Classifier, Detector, RecognitionResult};

const QUEUE_DEPTH: usize = 4;

/// Messages sent to the trainer thread.
enum TrainerRequest {
    Enroll {
        image: DynamicImage,
        name: String,
        reply: oneshot::Sender<Result<Enrollment, ServiceError>>,
    },
    Train {
        max_samples_per_identity: usize,
        reply: oneshot::Sender<Result<TrainStats, ServiceError>>,
    },
}

/// Clone-safe handle to a running service.
pub struct ServiceHandle<D, C: Classifier> {
    service: Arc<RecognitionService<D, C>>,
    tx: mpsc::Sender<TrainerRequest>,
}

impl<D, C: Classifier> Clone for ServiceHandle<D, C> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            tx: self.tx.clone(),
        }
    }
}

impl<D, C> ServiceHandle<D, C>
where
    D: Detector + 'static,
    C: Classifier + 'static,
{
    /// Start the trainer thread. It exits once every handle is dropped.
    pub fn spawn(service: RecognitionService<D, C>) -> Result<Self, ServiceError> {
        let service = Arc::new(service);
        let (tx, mut rx) = mpsc::channel::<TrainerRequest>(QUEUE_DEPTH);

        let worker = Arc::clone(&service);
        std::thread::Builder::new()
            .name("visionmate-trainer".into())
            .spawn(move || {
                tracing::info!("trainer thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        TrainerRequest::Enroll { image, name, reply } => {
                            let _ = reply.send(worker.enroll(&image, &name));
                        }
                        TrainerRequest::Train {
                            max_samples_per_identity,
                            reply,
                        } => {
                            let _ = reply.send(worker.train(max_samples_per_identity));
                        }
                    }
                }
                tracing::info!("trainer thread exiting");
            })
            .map_err(|e| ServiceError::Unavailable(format!("failed to spawn trainer thread: {e}")))?;

        Ok(Self { service, tx })
    }

    pub fn service(&self) -> &RecognitionService<D, C> {
        &self.service
    }

    pub async fn enroll(&self, image: DynamicImage, name: String) -> Result<Enrollment, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrainerRequest::Enroll { image, name, reply }).await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn train(&self, max_samples_per_identity: usize) -> Result<TrainStats, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrainerRequest::Train {
            max_samples_per_identity,
            reply,
        })
        .await?;
        rx.await.map_err(|_| closed())?
    }

    pub async fn recognize(&self, image: DynamicImage) -> Result<Vec<RecognitionResult>, ServiceError> {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || service.recognize(&image))
            .await
            .map_err(|e| ServiceError::Unavailable(format!("recognition task failed: {e}")))?
    }

    pub fn list_identities(&self) -> BTreeMap<u32, String> {
        self.service.list_identities()
    }

    pub fn status(&self) -> ServiceStatus {
        self.service.status()
    }

    async fn send(&self, req: TrainerRequest) -> Result<(), ServiceError> {
        self.tx.send(req).await.map_err(|_| closed())
    }
}

fn closed() -> ServiceError {
    ServiceError::Unavailable("trainer thread exited".into())
}
