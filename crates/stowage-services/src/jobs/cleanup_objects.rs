use super::JobHandler;
use crate::platform::Platform;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use stowage_core::models::{CleanupStoredObjectsPayload, QueueJob};
use stowage_core::JobResultExt;

/// Deletes a batch of storage objects whose catalog rows are already gone.
///
/// Cascade deletes fan these out as saga steps. Object deletion is a no-op
/// for missing keys, so a retried batch re-deletes the survivors and skips
/// the rest.
pub struct CleanupObjectsJobHandler;

#[async_trait]
impl JobHandler for CleanupObjectsJobHandler {
    #[tracing::instrument(skip(self, job, platform), fields(job.id = %job.id))]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: CleanupStoredObjectsPayload = job.try_payload_as().unrecoverable()?;

        let storage = platform.storage_client().await?;

        let mut deleted = 0usize;
        let mut failed = 0usize;
        for key in &payload.storage_keys {
            match storage.delete_object(&payload.bucket, key).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        error = %e,
                        bucket = %payload.bucket,
                        storage_key = %key,
                        "Failed to delete storage object"
                    );
                }
            }
        }

        if failed > 0 {
            return Err(anyhow!(
                "Deleted {} of {} storage objects, {} failed",
                deleted,
                payload.storage_keys.len(),
                failed
            ));
        }

        tracing::info!(
            bucket = %payload.bucket,
            deleted = deleted,
            "Storage objects cleaned up"
        );
        Ok(json!({
            "bucket": payload.bucket,
            "deleted": deleted,
        }))
    }
}
