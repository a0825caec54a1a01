//! Model artifact: the trained classifier persisted as one file.
//!
//! File format: a single JSON header line followed by the classifier's own
//! serialized bytes. The file is only ever replaced wholesale.

use crate::durable::write_atomic;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    pub identities: usize,
}

impl ArtifactHeader {
    pub fn new(samples: usize, identities: usize) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            trained_at: Utc::now(),
            samples,
            identities,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    path: PathBuf,
}

impl ModelArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the artifact.
    pub fn write(&self, header: &ArtifactHeader, model: &[u8]) -> Result<(), StoreError> {
        let mut bytes = serde_json::to_vec(header).map_err(|e| StoreError::Encode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        bytes.push(b'\n');
        bytes.extend_from_slice(model);
        write_atomic(&self.path, &bytes)?;

        tracing::info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            samples = header.samples,
            "model artifact written"
        );
        Ok(())
    }

    /// Read the artifact, or `None` when none has been written yet.
    pub fn read(&self) -> Result<Option<(ArtifactHeader, Vec<u8>)>, StoreError> {
        let mut bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.corrupt("missing header line"))?;
        let header: ArtifactHeader = serde_json::from_slice(&bytes[..split])
            .map_err(|e| self.corrupt(&format!("bad header: {e}")))?;
        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(self.corrupt(&format!(
                "format version {} (expected {ARTIFACT_FORMAT_VERSION})",
                header.format_version
            )));
        }

        let model = bytes.split_off(split + 1);
        Ok(Some((header, model)))
    }

    fn corrupt(&self, message: &str) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}
