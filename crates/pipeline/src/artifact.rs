//! Blob storage boundary for produced artifacts.

use thiserror::Error;

use crate::error::StageError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("artifact storage error: {0}")]
    Storage(String),
}

impl From<ArtifactError> for StageError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Storage(_) => StageError::Transient(err.to_string()),
            ArtifactError::NotFound(_) | ArtifactError::InvalidKey(_) => {
                StageError::Fatal(err.to_string())
            }
        }
    }
}

/// A stored blob as handed back for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl StoredArtifact {
    /// Last path segment of the key.
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Key/value blob store. Keys are `/`-separated relative paths.
///
/// `put` overwrites, so a retried stage can simply write again.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, ArtifactError>;

    fn get(&self, key: &str) -> Result<StoredArtifact, ArtifactError>;
}

/// Reject keys that could escape a storage root.
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(ArtifactError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// Guess a content type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "zip" => "application/zip",
        "json" => "application/json",
        "glb" => "model/gltf-binary",
        "usdz" => "model/vnd.usdz+zip",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}
