//! In-memory object store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::{validate_key, ObjectStore};

/// Object store held in memory, keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in `bucket`, sorted.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        validate_key(key)?;
        let data = self
            .get(bucket, key)
            .await
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_from(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        _content_type: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let data = tokio::fs::read(src)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        self.put(bucket, key, data).await;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.get(bucket, key).await.is_some())
    }
}
