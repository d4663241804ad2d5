use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use stowage_core::StorageBackend;
use tokio_util::io::ReaderStream;

use crate::permits::PermitPool;
use crate::traits::{
    ByteRange, ByteStream, StorageClient, StorageError, StorageResult, UploadedPart,
};

/// S3-compatible storage implementation
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
    permits: PermitPool,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO, "https://nyc3.digitaloceanspaces.com" for DigitalOcean Spaces)
    /// * `force_path_style` - Use path-style addressing (required for MinIO and
    ///   most self-hosted providers)
    /// * `credentials` - Optional explicit (access key id, secret access key);
    ///   falls back to the default AWS credential chain when absent
    pub async fn new(
        region: String,
        endpoint_url: Option<String>,
        force_path_style: bool,
        credentials: Option<(String, String)>,
        permits: PermitPool,
    ) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let mut config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone());

        if let Some((access_key_id, secret_access_key)) = credentials {
            config_builder = config_builder.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "stowage-config",
            ));
        }

        let config = config_builder.load().await;

        // Configure S3 client with custom endpoint if provided (for S3-compatible providers)
        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .endpoint_url(endpoint)
                .region(config.region().cloned())
                .retry_config(retry_config);
            if let Some(provider) = config.credentials_provider().into_iter().next() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            s3_config_builder = s3_config_builder.force_path_style(force_path_style);

            let s3_config = s3_config_builder.build();
            Client::from_conf(s3_config)
        } else {
            Client::new(&config)
        };

        Ok(S3Storage {
            client,
            region,
            permits,
        })
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let _permit = self.permits.acquire().await?;

        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %bucket, "S3 bucket created");
                Ok(())
            }
            Err(e) => match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    CreateBucketError::BucketAlreadyOwnedByYou(_) => Ok(()),
                    CreateBucketError::BucketAlreadyExists(_) => Ok(()),
                    _ => {
                        tracing::error!(error = %e, bucket = %bucket, "S3 create bucket failed");
                        Err(StorageError::BucketError(e.to_string()))
                    }
                },
                _ => {
                    tracing::error!(error = %e, bucket = %bucket, "S3 create bucket failed");
                    Err(StorageError::BucketError(e.to_string()))
                }
            },
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let mut swept = 0u64;

        // Sweep any objects the cascade missed; S3 refuses to delete a
        // non-empty bucket. Re-listing after each page converges because
        // every listed object is deleted.
        loop {
            let _permit = self.permits.acquire().await?;
            let page = match self.client.list_objects_v2().bucket(bucket).send().await {
                Ok(page) => page,
                Err(e) => match &e {
                    SdkError::ServiceError(service_err) => match service_err.err() {
                        ListObjectsV2Error::NoSuchBucket(_) => return Ok(()),
                        _ => return Err(StorageError::BucketError(e.to_string())),
                    },
                    _ => return Err(StorageError::BucketError(e.to_string())),
                },
            };

            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|object| object.key().map(String::from))
                .collect();
            if keys.is_empty() {
                break;
            }

            for key in keys {
                self.client
                    .delete_object()
                    .bucket(bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| StorageError::BucketError(e.to_string()))?;
                swept += 1;
            }
        }

        let _permit = self.permits.acquire().await?;
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, bucket = %bucket, "S3 delete bucket failed");
                StorageError::BucketError(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            swept_objects = swept,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 bucket deleted"
        );

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: Bytes,
    ) -> StorageResult<String> {
        let _permit = self.permits.acquire().await?;
        let size = data.len() as u64;
        let body = S3ByteStream::from(data);
        let start = std::time::Instant::now();

        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let etag = response.e_tag().unwrap_or_default().to_string();

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(etag)
    }

    async fn initiate_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let _permit = self.permits.acquire().await?;

        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Failed to create multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let upload_id = response.upload_id().ok_or_else(|| {
            StorageError::UploadFailed("No upload ID returned from S3".to_string())
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload_id,
            "S3 multipart upload initiated"
        );

        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> StorageResult<String> {
        let _permit = self.permits.acquire().await?;
        let size = data.len() as u64;
        let body = S3ByteStream::from(data);
        let start = std::time::Instant::now();

        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    part_number = part_number,
                    "Failed to upload part"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let etag = response
            .e_tag()
            .ok_or_else(|| {
                StorageError::UploadFailed(format!("No ETag returned for part {}", part_number))
            })?
            .to_string();

        tracing::info!(
            bucket = %bucket,
            key = %key,
            part_number = part_number,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 part upload successful"
        );

        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        let _permit = self.permits.acquire().await?;
        let start = std::time::Instant::now();

        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag.clone())
                    .build()
            })
            .collect();

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Failed to complete multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart upload completed"
        );

        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        let _permit = self.permits.acquire().await?;

        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Failed to abort multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            "S3 multipart upload aborted"
        );

        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        let _permit = self.permits.acquire().await?;
        let start = std::time::Instant::now();

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    GetObjectError::NoSuchKey(_) => StorageError::NotFound(key.to_string()),
                    _ => {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %key,
                            "S3 download failed"
                        );
                        StorageError::DownloadFailed(e.to_string())
                    }
                },
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 download failed"
                    );
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let async_read = response.body.into_async_read();
        let stream = ReaderStream::new(async_read)
            .map(|result| result.map_err(|e| StorageError::DownloadFailed(e.to_string())));

        let bucket = bucket.to_string();
        let key = key.to_string();
        let logged_stream = stream.map(move |item| {
            if item.is_err() {
                tracing::error!(
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
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
        let _permit = self.permits.acquire().await?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(format!("bytes={}-{}", range.start, range.end))
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err) => match service_err.err() {
                    GetObjectError::NoSuchKey(_) => StorageError::NotFound(key.to_string()),
                    _ => {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %key,
                            range_start = range.start,
                            range_end = range.end,
                            "S3 ranged download failed"
                        );
                        StorageError::DownloadFailed(e.to_string())
                    }
                },
                _ => StorageError::DownloadFailed(e.to_string()),
            })?;

        let async_read = response.body.into_async_read();
        let stream = ReaderStream::new(async_read)
            .map(|result| result.map_err(|e| StorageError::DownloadFailed(e.to_string())));

        Ok(Box::pin(stream))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let _permit = self.permits.acquire().await?;
        let start = std::time::Instant::now();

        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let presigned_request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
