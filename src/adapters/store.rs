//! Durable registry persistence.
//!
//! The canonical state file is a JSON object mapping route prefix to
//! `{ name, targets }`. Writes go through a temporary sibling file followed by
//! an atomic rename, so a crash mid-write can never leave the canonical file
//! half-written. Health metrics are deliberately excluded: they are re-derived
//! by probing after a restart.
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::snapshot::RegistrySnapshot;

/// Errors raised by registry persistence.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("failed to encode registry state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted form of one route group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedService {
    pub name: String,
    pub targets: Vec<String>,
}

/// Persisted form of the whole registry, keyed by prefix.
pub type PersistedRegistry = BTreeMap<String, PersistedService>;

/// File-backed registry store. Written by the owner task only.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut os_string = self.path.as_os_str().to_owned();
        os_string.push(".tmp");
        PathBuf::from(os_string)
    }

    /// Persist a snapshot: serialize, write the temp sibling, rename over the
    /// canonical file.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> StoreResult<()> {
        let state: PersistedRegistry = snapshot
            .entries()
            .map(|entry| {
                (
                    entry.prefix.clone(),
                    PersistedService {
                        name: entry.service_name.clone(),
                        targets: entry.targets.clone(),
                    },
                )
            })
            .collect();

        let encoded = serde_json::to_vec_pretty(&state)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp = self.temp_path();
        fs::write(&temp, &encoded).map_err(|source| StoreError::Io {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            routes = state.len(),
            "registry state persisted"
        );
        Ok(())
    }

    /// Load persisted state. A missing file is a clean first boot, not an
    /// error.
    pub fn load(&self) -> StoreResult<Option<PersistedRegistry>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let state: PersistedRegistry = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::core::registry::{Registry, ServiceRegistration};

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(&ServiceRegistration {
                name: "svc-a".to_string(),
                url: "http://localhost:5001".to_string(),
                routes: vec!["/svc".to_string()],
            })
            .unwrap();
        registry
            .register(&ServiceRegistration {
                name: "svc-a".to_string(),
                url: "http://localhost:5002".to_string(),
                routes: vec!["/svc".to_string()],
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        store.save(&sample_registry().snapshot()).unwrap();
        let state = store.load().unwrap().unwrap();

        assert_eq!(state.len(), 1);
        let service = &state["/svc"];
        assert_eq!(service.name, "svc-a");
        assert_eq!(
            service.targets,
            vec!["http://localhost:5001", "http://localhost:5002"]
        );
    }

    #[test]
    fn test_missing_file_is_clean_boot() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, b"{ truncated").unwrap();

        let store = RegistryStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Encode(_))));
    }

    #[test]
    fn test_crash_between_temp_write_and_rename_keeps_canonical_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let store = RegistryStore::new(&path);

        store.save(&sample_registry().snapshot()).unwrap();

        // Simulate a crash after the temp file was written but before the
        // rename: a stale temp sibling must not affect the canonical file.
        fs::write(store.temp_path(), b"partial garbage").unwrap();

        let state = store.load().unwrap().unwrap();
        assert_eq!(state["/svc"].targets.len(), 2);
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        store.save(&sample_registry().snapshot()).unwrap();

        let mut registry = sample_registry();
        registry
            .register(&ServiceRegistration {
                name: "svc-b".to_string(),
                url: "http://localhost:6001".to_string(),
                routes: vec!["/other".to_string()],
            })
            .unwrap();
        store.save(&registry.snapshot()).unwrap();

        let state = store.load().unwrap().unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state["/other"].name, "svc-b");
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("state/nested/registry.json"));
        store.save(&sample_registry().snapshot()).unwrap();
        assert!(store.load().unwrap().is_some());
    }
}
