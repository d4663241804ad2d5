use super::JobHandler;
use crate::platform::Platform;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use stowage_core::models::{DeleteBucketPayload, QueueJob};
use stowage_core::JobResultExt;

/// Tears down a deleted workspace's bucket, objects and all.
///
/// Runs as the terminal step of the workspace-delete saga, after every
/// cleanup batch has finished. Bucket deletion is a no-op when the bucket is
/// already gone, so retries converge.
pub struct DeleteBucketJobHandler;

#[async_trait]
impl JobHandler for DeleteBucketJobHandler {
    #[tracing::instrument(skip(self, job, platform), fields(job.id = %job.id))]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: DeleteBucketPayload = job.try_payload_as().unrecoverable()?;

        let storage = platform.storage_client().await?;

        storage
            .delete_bucket(&payload.bucket)
            .await
            .context("Failed to delete bucket")?;

        tracing::info!(
            bucket = %payload.bucket,
            workspace_id = %payload.workspace_id,
            "Bucket deleted"
        );
        Ok(json!({
            "bucket": payload.bucket,
            "workspace_id": payload.workspace_id,
        }))
    }
}
