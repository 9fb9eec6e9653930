use std::collections::HashMap;
use std::sync::RwLock;

use kitchenline_pipeline::artifact::validate_key;
use kitchenline_pipeline::{ArtifactError, ArtifactStore, StoredArtifact};

/// In-memory artifact store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    blobs: RwLock<HashMap<String, StoredArtifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.blobs.read() {
            Ok(blobs) => blobs.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, ArtifactError> {
        validate_key(key)?;
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| ArtifactError::Storage("artifact map lock poisoned".into()))?;
        blobs.insert(
            key.to_string(),
            StoredArtifact {
                key: key.to_string(),
                content_type: content_type.to_string(),
                bytes: bytes.to_vec(),
            },
        );
        Ok(key.to_string())
    }

    fn get(&self, key: &str) -> Result<StoredArtifact, ArtifactError> {
        validate_key(key)?;
        let blobs = self
            .blobs
            .read()
            .map_err(|_| ArtifactError::Storage("artifact map lock poisoned".into()))?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_and_get_returns_latest() {
        let store = InMemoryArtifactStore::new();
        store.put("ar/1/assets.json", b"{}", "application/json").unwrap();
        store.put("ar/1/assets.json", b"{\"v\":2}", "application/json").unwrap();

        let got = store.get("ar/1/assets.json").unwrap();
        assert_eq!(got.bytes, b"{\"v\":2}".to_vec());
        assert_eq!(store.keys(), vec!["ar/1/assets.json".to_string()]);
        assert!(matches!(store.get("ar/2/assets.json"), Err(ArtifactError::NotFound(_))));
        assert!(matches!(store.put("../x", b"", "x"), Err(ArtifactError::InvalidKey(_))));
    }
}
