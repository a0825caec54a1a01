//! Identity registry: persisted identity id → display name mapping.
//!
//! Stored as a JSON object keyed by the decimal id, e.g. `{"1": "Aria"}`.

use crate::durable::write_atomic;
use crate::error::StoreError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    path: PathBuf,
    names: BTreeMap<u32, String>,
}

impl IdentityRegistry {
    /// An empty registry that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            names: BTreeMap::new(),
        }
    }

    /// Read the registry at `path`.
    ///
    /// Never fails: a missing or unparseable file yields an empty registry and
    /// individual bad entries are dropped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no identity registry yet");
                return Self::empty(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "identity registry unreadable; starting empty");
                return Self::empty(path);
            }
        };

        let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "identity registry malformed; starting empty");
                return Self::empty(path);
            }
        };

        let mut names = BTreeMap::new();
        for (key, value) in entries {
            match parse_entry(&key, &value) {
                Some((id, name)) => {
                    names.insert(id, name);
                }
                None => tracing::warn!(key = %key, %value, "dropping malformed registry entry"),
            }
        }

        tracing::info!(path = %path.display(), identities = names.len(), "loaded identity registry");
        Self { path, names }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or rename an identity, persisting before the change is applied.
    ///
    /// On a write failure the in-memory mapping is left untouched.
    pub fn upsert(&mut self, id: u32, name: &str) -> Result<(), StoreError> {
        let mut next = self.names.clone();
        next.insert(id, name.to_string());
        self.persist(&next)?;
        self.names = next;
        Ok(())
    }

    /// `max(id) + 1`, or 1 for an empty registry.
    pub fn next_id(&self) -> u32 {
        self.names.keys().next_back().map_or(1, |max| max + 1)
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Owned copy of the mapping.
    pub fn list(&self) -> BTreeMap<u32, String> {
        self.names.clone()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn persist(&self, names: &BTreeMap<u32, String>) -> Result<(), StoreError> {
        let encoded: BTreeMap<String, &String> =
            names.iter().map(|(id, name)| (id.to_string(), name)).collect();
        let bytes = serde_json::to_vec_pretty(&encoded).map_err(|e| StoreError::Encode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &bytes)
    }
}

fn parse_entry(key: &str, value: &serde_json::Value) -> Option<(u32, String)> {
    let id: u32 = key.trim().parse().ok().filter(|&id| id > 0)?;
    let name = value.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((id, name.to_string()))
}
