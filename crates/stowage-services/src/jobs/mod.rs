mod cleanup_objects;
mod complete_multipart;
mod copy_file;
mod delete_bucket;
mod recompute_size;
mod sweep_uploads;

pub use cleanup_objects::CleanupObjectsJobHandler;
pub use complete_multipart::CompleteMultipartJobHandler;
pub use copy_file::CopyFileJobHandler;
pub use delete_bucket::DeleteBucketJobHandler;
pub use recompute_size::RecomputeSizeJobHandler;
pub use sweep_uploads::SweepUploadsJobHandler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::platform::Platform;
use stowage_core::models::QueueJob;

/// Trait for queue-job handlers.
///
/// How a handler fails decides what the engine does with the job: an error
/// wrapping an unrecoverable [`stowage_core::JobError`] fails the job
/// immediately, an error wrapping [`stowage_core::PlatformError::Blocked`]
/// parks it without burning a retry, and anything else retries with backoff.
/// Corrupt payloads are always unrecoverable; parse them with
/// `job.try_payload_as().unrecoverable()?`.
#[async_trait]
pub trait JobHandler {
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value>;
}
