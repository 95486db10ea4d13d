//! Object storage for pipeline stages.
//!
//! Stages read their input from one bucket and write their output to
//! another, addressed by object key. [`ObjectStore`] is the seam; [`S3Store`]
//! talks to S3 or any S3-compatible store and [`MemoryObjectStore`] backs
//! tests.

pub mod client;
pub mod error;
pub mod memory;

pub use client::{S3Config, S3Store};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use std::path::Path;

/// Bucket/key addressed object store working on local files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download `bucket/key` into `dest`, creating parent directories.
    ///
    /// Returns [`StorageError::NotFound`] when the object does not exist.
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64>;

    /// Upload `src` to `bucket/key`, replacing any existing object.
    async fn upload_from(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: &str,
    ) -> StorageResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;
}

/// Reject keys a stage must never read or write.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("raw/v-1.mp4").is_ok());
        assert!(validate_key("v-1.mp4").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("  ").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("raw/../secrets").is_err());
    }
}
