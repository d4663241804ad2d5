#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{PermitPool, StorageBackend, StorageClient, StorageError, StorageResult};
use std::sync::Arc;
use stowage_core::PlatformConfig;

/// Create a storage client based on configuration
pub async fn create_storage_client(
    config: &PlatformConfig,
) -> StorageResult<Arc<dyn StorageClient>> {
    let backend = config.storage_backend.unwrap_or(StorageBackend::S3);
    let permits = PermitPool::new(config.storage_max_concurrent_requests);

    match backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            // S3-compatible providers accept any region string; fall back to
            // a placeholder when only an endpoint is configured.
            let region = config
                .s3_region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string());
            let endpoint = config.s3_endpoint.clone();
            let credentials = match (
                config.aws_access_key_id.clone(),
                config.aws_secret_access_key.clone(),
            ) {
                (Some(access_key_id), Some(secret_access_key)) => {
                    Some((access_key_id, secret_access_key))
                }
                _ => None,
            };

            let storage = S3Storage::new(
                region,
                endpoint,
                config.s3_force_path_style,
                credentials,
                permits,
            )
            .await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;

            let storage = LocalStorage::new(base_path).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
