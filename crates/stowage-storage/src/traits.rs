//! Storage abstraction trait
//!
//! This module defines the StorageClient trait that all storage backends must
//! implement. Operations are idempotent at the key level (re-uploading a key
//! overwrites) except multipart completion, which is terminal.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use stowage_core::StorageBackend;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Bucket operation failed: {0}")]
    BucketError(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A stream of downloaded bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Drain a download stream into one contiguous buffer. Callers that need
/// whole objects in memory (encryption translation, archive assembly) use
/// this; streaming consumers iterate the stream directly.
pub async fn collect_stream(mut stream: ByteStream) -> StorageResult<Bytes> {
    use bytes::BytesMut;
    use futures::StreamExt;

    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Inclusive byte range, matching the HTTP `bytes={start}-{end}` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// One finished part of a multipart upload, as acknowledged by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Storage abstraction trait
///
/// All storage backends (S3-compatible, local filesystem) must implement this
/// trait. Buckets are passed per call because each workspace owns its own
/// bucket.
///
/// **Key format:** keys must not contain `..` or a leading `/`. Key
/// generation is centralized in the `keys` module so all backends stay
/// consistent.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create a bucket. Creating a bucket that already exists is a no-op.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Delete a bucket and any objects still in it. Deleting a bucket that
    /// does not exist is a no-op, so retried jobs converge.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Upload a whole object in one request and return the backend's tag.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Begin a multipart upload and return the backend's upload id.
    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Upload one part (1-based part numbers) and return its tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Assemble previously uploaded parts into the final object. Terminal:
    /// the upload id is invalid afterwards.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()>;

    /// Abandon a multipart upload, discarding its parts.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()>;

    /// Download a whole object as a byte stream.
    async fn download(&self, bucket: &str, key: &str) -> StorageResult<ByteStream>;

    /// Download an inclusive byte range of an object.
    async fn download_range(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> StorageResult<ByteStream>;

    /// Delete an object. Deleting a missing object is a no-op.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Generate a temporary URL for direct GET access. Backends without a
    /// URL scheme return `ConfigError`; callers fall back to proxying.
    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Generate a temporary URL for a direct PUT with a pinned content type.
    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_len() {
        assert_eq!(ByteRange::new(0, 0).len(), 1);
        assert_eq!(ByteRange::new(100, 199).len(), 100);
        assert!(ByteRange::new(5, 4).is_empty());
    }
}
