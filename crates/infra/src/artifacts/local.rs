//! Filesystem artifact store.
//!
//! Keys map to paths under a root directory. Writes go to a temporary sibling
//! first and are renamed into place, so a reader never sees a half-written
//! file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use kitchenline_pipeline::artifact::{content_type_for, validate_key};
use kitchenline_pipeline::{ArtifactError, ArtifactStore, StoredArtifact};

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create the root directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ArtifactError::Storage(format!("cannot create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, ArtifactError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ArtifactError::Storage(format!("cannot create {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("partial");
        fs::write(&tmp, bytes)
            .map_err(|e| ArtifactError::Storage(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| ArtifactError::Storage(format!("cannot move {}: {e}", path.display())))?;
        debug!(key, content_type, size = bytes.len(), "artifact stored");
        Ok(key.to_string())
    }

    fn get(&self, key: &str) -> Result<StoredArtifact, ArtifactError> {
        let path = self.path_for(key)?;
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArtifactError::NotFound(key.to_string()),
            _ => ArtifactError::Storage(format!("cannot read {}: {e}", path.display())),
        })?;
        Ok(StoredArtifact {
            key: key.to_string(),
            content_type: content_type_for(key).to_string(),
            bytes,
        })
    }
}
