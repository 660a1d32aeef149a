use std::path::PathBuf;

use async_trait::async_trait;
use pipeline_core::artifacts::ObjectStore;
use pipeline_core::errors::{CoreError, CoreResult};

/// Filesystem-backed [`ObjectStore`] reference implementation, rooted under
/// a configured directory. Not a production object-storage client — just
/// enough for the upload/export round trip to have somewhere to land.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> CoreResult<PathBuf> {
        pipeline_core::artifacts::validate_storage_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_bytes(&self, key: &str, payload: Vec<u8>) -> CoreResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(format!("file://{key}"))
    }

    async fn get_bytes(&self, key: &str) -> CoreResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_through_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let ref_ = store.put_bytes("normalized/sub_1/v1.json", b"payload".to_vec()).await.unwrap();
        assert_eq!(ref_, "file://normalized/sub_1/v1.json");

        let bytes = store.get_bytes("normalized/sub_1/v1.json").await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn get_bytes_on_missing_key_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.get_bytes("missing/key.json").await.unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }

    #[tokio::test]
    async fn keys_outside_the_allowed_prefixes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = store.put_bytes("../escape.json", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
