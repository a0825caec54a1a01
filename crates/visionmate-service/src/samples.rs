//! Sample store: one directory of face crops per identity.
//!
//! Layout: `<root>/user<id>/<timestamp>_<suffix>.png`. Legacy `.jpg`/`.jpeg`
//! crops dropped in by collection tooling are read as well.

use crate::durable::write_atomic;
use crate::error::StoreError;
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Directory name prefix; the rest of the name is the decimal identity id.
pub const IDENTITY_DIR_PREFIX: &str = "user";
const SAMPLE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, identity_id: u32) -> PathBuf {
        self.root.join(format!("{IDENTITY_DIR_PREFIX}{identity_id}"))
    }

    /// Store one grayscale crop for `identity_id`, returning its path.
    pub fn add_sample(&self, identity_id: u32, face: &GrayImage) -> Result<PathBuf, StoreError> {
        let dir = self.identity_dir(identity_id);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("{stamp}_{}.png", &suffix[..8]));

        let mut encoded = Vec::new();
        face.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| StoreError::Encode {
                path: path.clone(),
                message: e.to_string(),
            })?;
        write_atomic(&path, &encoded)?;

        tracing::debug!(identity_id, path = %path.display(), "stored face sample");
        Ok(path)
    }

    /// Up to `limit` sample paths for `identity_id`, in lexicographic order.
    pub fn list_samples(&self, identity_id: u32, limit: usize) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.identity_dir(identity_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if path.is_file() && is_sample_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        paths.truncate(limit);
        Ok(paths)
    }

    /// Identity ids with a sample directory, ascending.
    ///
    /// Directories not named `user<digits>` are skipped with a warning.
    pub fn identities(&self) -> Result<Vec<u32>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(root = %self.root.display(), "dataset directory does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            if !path.is_dir() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match parse_identity_dir(name) {
                Some(id) => ids.push(id),
                None => tracing::warn!(dir = %path.display(), "skipping dataset directory without an identity id"),
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Delete one sample, and its identity directory if that leaves it empty.
    pub fn remove_sample(&self, path: &Path) -> Result<(), StoreError> {
        std::fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
        if let Some(dir) = path.parent() {
            // Fails while other samples remain.
            let _ = std::fs::remove_dir(dir);
        }
        tracing::debug!(path = %path.display(), "removed face sample");
        Ok(())
    }

    pub fn load_sample(&self, path: &Path) -> Result<GrayImage, StoreError> {
        image::open(path)
            .map(|img| img.to_luma8())
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Sample count per identity directory.
    pub fn summary(&self) -> Result<Vec<(u32, usize)>, StoreError> {
        self.identities()?
            .into_iter()
            .map(|id| Ok((id, self.list_samples(id, usize::MAX)?.len())))
            .collect()
    }
}

/// Parse `user<digits>` into a positive identity id.
pub fn parse_identity_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(IDENTITY_DIR_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&id| id > 0)
}

fn is_sample_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SAMPLE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
