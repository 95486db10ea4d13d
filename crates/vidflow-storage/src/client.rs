//! S3 client implementation.

use async_trait::async_trait;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::{validate_key, ObjectStore};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL for S3-compatible stores; AWS when unset
    pub endpoint_url: Option<String>,
    pub region: String,
    /// Static credentials; the default AWS chain is used when unset
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style addressing (MinIO and most self-hosted stores)
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let config = Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok().filter(|v| !v.is_empty()),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty()),
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            force_path_style: std::env::var("S3_FORCE_PATH_STYLE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(StorageError::config_error(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together",
            ));
        }
        if let Some(endpoint) = &self.endpoint_url {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(StorageError::config_error(format!(
                    "S3_ENDPOINT_URL must be an http(s) URL: {}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// S3 / S3-compatible object store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        config.validate()?;

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                key_id, secret, None, None, "vidflow-env",
            ));
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(S3Config::from_env()?).await
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        validate_key(key)?;
        debug!("Downloading {}/{} to {}", bucket, key, dest.display());

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::not_found(format!("{}/{}", bucket, key))
                } else {
                    StorageError::download_failed(service_error.to_string())
                }
            })?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let reader = response.body.into_async_read();
        tokio::pin!(reader);
        let mut file = tokio::fs::File::create(dest).await?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?;
        file.flush().await?;

        info!("Downloaded {}/{} ({} bytes)", bucket, key, written);
        Ok(written)
    }

    async fn upload_from(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        debug!("Uploading {} to {}/{}", src.display(), bucket, key);

        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}/{}", src.display(), bucket, key);
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::download_failed(service_error.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(S3Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let config = S3Config {
            access_key_id: Some("key".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StorageError::ConfigError(_))));
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let config = S3Config {
            endpoint_url: Some("minio:9000".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = S3Config {
            endpoint_url: Some("http://minio:9000".to_string()),
            force_path_style: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
