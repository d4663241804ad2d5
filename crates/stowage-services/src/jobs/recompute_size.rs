use super::JobHandler;
use crate::platform::Platform;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use stowage_core::models::{QueueJob, RecomputeWorkspaceSizePayload};
use stowage_core::{JobResultExt, PlatformError};

/// Recomputes a workspace's accounted size from its completed files.
///
/// Enqueued (debounced) after every mutation that changes the sum, and as
/// the terminal step of folder-delete sagas. The workspace being gone is a
/// success: a delete won the race and there is nothing left to account.
pub struct RecomputeSizeJobHandler;

#[async_trait]
impl JobHandler for RecomputeSizeJobHandler {
    #[tracing::instrument(skip(self, job, platform), fields(job.id = %job.id))]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: RecomputeWorkspaceSizePayload = job.try_payload_as().unrecoverable()?;
        let workspace_id = payload.workspace_id;

        let workspaces = platform.workspaces.clone();
        let result = platform
            .writer
            .write(move |tx| {
                Box::pin(async move { workspaces.recompute_size(tx, workspace_id).await })
            })
            .await;

        match result {
            Ok(size_bytes) => {
                tracing::info!(
                    workspace_id = %workspace_id,
                    size_bytes = size_bytes,
                    "Workspace size recomputed"
                );
                Ok(json!({
                    "workspace_id": workspace_id,
                    "size_bytes": size_bytes,
                }))
            }
            Err(e) => match PlatformError::from_any(e) {
                PlatformError::NotFound(_) => {
                    tracing::info!(
                        workspace_id = %workspace_id,
                        "Workspace already deleted, nothing to recompute"
                    );
                    Ok(json!({
                        "workspace_id": workspace_id,
                        "skipped": "workspace_deleted",
                    }))
                }
                other => Err(other.into()),
            },
        }
    }
}
