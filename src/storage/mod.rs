//! Binary object storage for normalized study images.
//!
//! Blob refs are opaque relative paths (`patients/<id>/studies/<id>/<uuid>.jpg`)
//! minted by `put`. Consumers never construct refs themselves; they only carry
//! them between the database and this store. Prefix deletion backs the
//! patient/study cascade cleanup and never raises — a leaked file is
//! preferable to a failed delete.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object reference: {0}")]
    InvalidRef(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract the pipeline consumes. `put` returns the blob ref; `get` fetches
/// the stored bytes; `delete_prefix` removes every object under a path
/// prefix, logging (not raising) failures.
pub trait ObjectStore: Send + Sync {
    fn put(&self, bytes: &[u8], content_type: &str, path_hint: &str)
        -> Result<String, StorageError>;
    fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StorageError>;
    fn delete_prefix(&self, prefix: &str);
}

/// Filesystem-backed store under a single root directory.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative ref/prefix against the root, rejecting anything
    /// that could escape it.
    fn resolve(&self, rel: &str) -> Result<PathBuf, StorageError> {
        let path = Path::new(rel);
        if rel.is_empty()
            || path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(StorageError::InvalidRef(rel.to_string()));
        }
        Ok(self.root.join(path))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(
        &self,
        bytes: &[u8],
        content_type: &str,
        path_hint: &str,
    ) -> Result<String, StorageError> {
        let extension = match content_type {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let blob_ref = format!("{}/{}.{}", path_hint, Uuid::new_v4(), extension);
        let target = self.resolve(&blob_ref)?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)?;

        tracing::debug!(blob_ref = %blob_ref, size = bytes.len(), "Object stored");
        Ok(blob_ref)
    }

    fn get(&self, blob_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(blob_ref)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(blob_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_prefix(&self, prefix: &str) {
        let dir = match self.resolve(prefix) {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "Refusing to delete invalid prefix");
                return;
            }
        };
        if !dir.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(prefix, error = %e, "Failed to delete object prefix");
        } else {
            tracing::debug!(prefix, "Object prefix deleted");
        }
    }
}

/// Path hint for everything owned by one patient.
pub fn patient_prefix(patient_id: &Uuid) -> String {
    format!("patients/{patient_id}")
}

/// Path hint for one study's objects.
pub fn study_prefix(patient_id: &Uuid, study_id: &Uuid) -> String {
    format!("patients/{patient_id}/studies/{study_id}")
}
