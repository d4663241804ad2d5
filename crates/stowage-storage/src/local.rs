use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use stowage_core::StorageBackend;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use uuid::Uuid;

use crate::traits::{
    ByteRange, ByteStream, StorageClient, StorageError, StorageResult, UploadedPart,
};

/// Directory under each bucket holding in-flight multipart uploads.
const MULTIPART_DIR: &str = ".multipart";

/// Local filesystem storage implementation
///
/// Buckets are directories under the base path; multipart uploads stage
/// their parts under `{bucket}/.multipart/{upload_id}/` and completion
/// concatenates them into the final object.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance rooted at `base_path`.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    /// Convert a bucket name to its directory with security validation.
    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        if bucket.is_empty() || bucket.contains("..") || bucket.contains('/') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid bucket name: {}",
                bucket
            )));
        }
        Ok(self.base_path.join(bucket))
    }

    /// Convert a (bucket, key) pair to a filesystem path with security
    /// validation. Keys must not contain path traversal sequences that could
    /// escape the bucket directory.
    fn key_to_path(&self, bucket: &str, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.contains("..") || storage_key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.bucket_dir(bucket)?.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;
        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn staging_dir(&self, bucket: &str, upload_id: &str) -> StorageResult<PathBuf> {
        if upload_id.is_empty() || upload_id.contains("..") || upload_id.contains('/') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid upload id: {}",
                upload_id
            )));
        }
        Ok(self.bucket_dir(bucket)?.join(MULTIPART_DIR).join(upload_id))
    }

    async fn require_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(StorageError::BucketError(format!(
                "No such bucket: {}",
                bucket
            )));
        }
        Ok(dir)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_object(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent_dir(path).await?;

        let mut file = fs::File::create(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

/// Deterministic tag for locally stored content.
fn content_etag(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::BucketError(format!(
                "Failed to create bucket {}: {}",
                dir.display(),
                e
            ))
        })?;

        tracing::info!(bucket = %bucket, path = %dir.display(), "Local bucket created");
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket)?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_dir_all(&dir).await.map_err(|e| {
            StorageError::BucketError(format!(
                "Failed to delete bucket {}: {}",
                dir.display(),
                e
            ))
        })?;

        tracing::info!(bucket = %bucket, path = %dir.display(), "Local bucket deleted");
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        self.require_bucket(bucket).await?;
        let path = self.key_to_path(bucket, key)?;
        let size = data.len();
        let start = std::time::Instant::now();

        self.write_object(&path, &data).await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(content_etag(&data))
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        _key: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        self.require_bucket(bucket).await?;
        let upload_id = Uuid::new_v4().to_string();
        let staging = self.staging_dir(bucket, &upload_id)?;

        fs::create_dir_all(&staging).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create staging directory {}: {}",
                staging.display(),
                e
            ))
        })?;

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<String> {
        let staging = self.staging_dir(bucket, upload_id)?;
        if !fs::try_exists(&staging).await.unwrap_or(false) {
            return Err(StorageError::UploadFailed(format!(
                "Unknown multipart upload: {}",
                upload_id
            )));
        }

        let part_path = staging.join(format!("{:05}", part_number));
        self.write_object(&part_path, &data).await?;

        Ok(content_etag(&data))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        if parts.is_empty() {
            return Err(StorageError::UploadFailed(
                "Cannot complete a multipart upload with no parts".to_string(),
            ));
        }

        let staging = self.staging_dir(bucket, upload_id)?;
        let target = self.key_to_path(bucket, key)?;
        self.ensure_parent_dir(&target).await?;
        let start = std::time::Instant::now();

        let mut file = fs::File::create(&target).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                target.display(),
                e
            ))
        })?;

        let mut total = 0u64;
        for part in parts {
            let part_path = staging.join(format!("{:05}", part.part_number));
            let data = fs::read(&part_path).await.map_err(|_| {
                StorageError::UploadFailed(format!(
                    "Missing part {} for upload {}",
                    part.part_number, upload_id
                ))
            })?;
            if content_etag(&data) != part.etag {
                return Err(StorageError::UploadFailed(format!(
                    "ETag mismatch for part {} of upload {}",
                    part.part_number, upload_id
                )));
            }
            file.write_all(&data).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    target.display(),
                    e
                ))
            })?;
            total += data.len() as u64;
        }

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", target.display(), e))
        })?;

        fs::remove_dir_all(&staging).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to remove staging directory {}: {}",
                staging.display(),
                e
            ))
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            parts = parts.len(),
            size_bytes = total,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local multipart upload completed"
        );

        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let staging = self.staging_dir(bucket, upload_id)?;
        if !fs::try_exists(&staging).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_dir_all(&staging).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to remove staging directory {}: {}",
                staging.display(),
                e
            ))
        })?;

        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let reader = tokio_util::io::ReaderStream::new(file);
        let stream = reader.map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        let key = key.to_string();
        let path_display = path.display().to_string();
        let logged_stream = stream.map(move |item| {
            if item.is_err() {
                tracing::error!(
                    path = %path_display,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream download error"
                );
            }
            item
        });

        Ok(Box::pin(logged_stream))
    }

    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> StorageResult<ByteStream> {
        if range.is_empty() {
            return Err(StorageError::DownloadFailed("Empty byte range".to_string()));
        }

        let path = self.key_to_path(bucket, key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let mut file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;

        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .len();
        if range.start >= len {
            return Err(StorageError::DownloadFailed(format!(
                "Range start {} beyond object size {}",
                range.start, len
            )));
        }

        file.seek(SeekFrom::Start(range.start)).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to seek {}: {}", path.display(), e))
        })?;

        // Clamp the end to the object size, matching S3 range semantics.
        let effective_end = range.end.min(len - 1);
        let take = file.take(effective_end - range.start + 1);

        let reader = tokio_util::io::ReaderStream::new(take);
        let stream = reader.map(|result| {
            result.map_err(|e| StorageError::DownloadFailed(format!("Failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn presigned_get_url(
        &self,
        _bucket: &str,
        _key: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        Err(StorageError::ConfigError(
            "Pre-signed URLs require an S3-compatible backend".to_string(),
        ))
    }

    async fn presigned_put_url(
        &self,
        _bucket: &str,
        _key: &str,
        _content_type: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        Err(StorageError::ConfigError(
            "Pre-signed URLs require an S3-compatible backend".to_string(),
        ))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::tempdir;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn test_storage(dir: &Path) -> LocalStorage {
        let storage = LocalStorage::new(dir).await.unwrap();
        storage.create_bucket("bucket").await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let data = Bytes::from_static(b"test data");
        let etag = storage
            .upload("bucket", "files/test.txt", "text/plain", data.clone())
            .await
            .unwrap();
        assert!(!etag.is_empty());

        let downloaded = collect(storage.download("bucket", "files/test.txt").await.unwrap()).await;
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let result = storage.download("bucket", "files/nope").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let upload_id = storage
            .initiate_multipart("bucket", "files/big", "application/octet-stream")
            .await
            .unwrap();

        let mut parts = Vec::new();
        for (number, byte) in [(1, b'a'), (2, b'b'), (3, b'c')] {
            let data = Bytes::from(vec![byte; 1024]);
            let etag = storage
                .upload_part("bucket", "files/big", &upload_id, number, data)
                .await
                .unwrap();
            parts.push(UploadedPart {
                part_number: number,
                etag,
            });
        }

        storage
            .complete_multipart("bucket", "files/big", &upload_id, &parts)
            .await
            .unwrap();

        let downloaded = collect(storage.download("bucket", "files/big").await.unwrap()).await;
        assert_eq!(downloaded.len(), 3 * 1024);
        assert!(downloaded[..1024].iter().all(|&b| b == b'a'));
        assert!(downloaded[2048..].iter().all(|&b| b == b'c'));

        // Staging is gone; completing twice fails.
        let again = storage
            .complete_multipart("bucket", "files/big", &upload_id, &parts)
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_fails() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let upload_id = storage
            .initiate_multipart("bucket", "files/partial", "application/octet-stream")
            .await
            .unwrap();
        let etag = storage
            .upload_part(
                "bucket",
                "files/partial",
                &upload_id,
                1,
                Bytes::from_static(b"one"),
            )
            .await
            .unwrap();

        let parts = vec![
            UploadedPart {
                part_number: 1,
                etag,
            },
            UploadedPart {
                part_number: 2,
                etag: "missing".to_string(),
            },
        ];
        let result = storage
            .complete_multipart("bucket", "files/partial", &upload_id, &parts)
            .await;
        assert!(matches!(result, Err(StorageError::UploadFailed(_))));
    }

    #[tokio::test]
    async fn test_abort_discards_parts() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let upload_id = storage
            .initiate_multipart("bucket", "files/aborted", "application/octet-stream")
            .await
            .unwrap();
        storage
            .upload_part(
                "bucket",
                "files/aborted",
                &upload_id,
                1,
                Bytes::from_static(b"bytes"),
            )
            .await
            .unwrap();

        storage
            .abort_multipart("bucket", "files/aborted", &upload_id)
            .await
            .unwrap();

        // Aborting again is a no-op; uploading after abort fails.
        storage
            .abort_multipart("bucket", "files/aborted", &upload_id)
            .await
            .unwrap();
        let result = storage
            .upload_part(
                "bucket",
                "files/aborted",
                &upload_id,
                2,
                Bytes::from_static(b"late"),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_download_range() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let data = Bytes::from((0u8..100).collect::<Vec<u8>>());
        storage
            .upload("bucket", "files/ranged", "application/octet-stream", data)
            .await
            .unwrap();

        let middle = collect(
            storage
                .download_range("bucket", "files/ranged", ByteRange::new(10, 19))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(middle, (10u8..20).collect::<Vec<u8>>());

        // End past the object is clamped.
        let tail = collect(
            storage
                .download_range("bucket", "files/ranged", ByteRange::new(90, 500))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(tail, (90u8..100).collect::<Vec<u8>>());

        let past_end = storage
            .download_range("bucket", "files/ranged", ByteRange::new(100, 200))
            .await;
        assert!(past_end.is_err());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let result = storage.download("bucket", "../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete_object("bucket", "/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.create_bucket("../outside").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_object_is_ok() {
        let dir = tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let result = storage.delete_object("bucket", "files/nonexistent").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage.create_bucket("ws").await.unwrap();
        // Creating again is a no-op.
        storage.create_bucket("ws").await.unwrap();

        storage
            .upload("ws", "files/a", "text/plain", Bytes::from_static(b"a"))
            .await
            .unwrap();

        storage.delete_bucket("ws").await.unwrap();
        let result = storage.download("ws", "files/a").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        // Deleting a missing bucket is a no-op.
        storage.delete_bucket("ws").await.unwrap();

        // Uploading into a deleted bucket fails.
        let result = storage
            .upload("ws", "files/b", "text/plain", Bytes::from_static(b"b"))
            .await;
        assert!(matches!(result, Err(StorageError::BucketError(_))));
    }
}
