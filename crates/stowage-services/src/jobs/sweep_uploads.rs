use super::JobHandler;
use crate::platform::Platform;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use stowage_core::models::{QueueJob, SweepExpiredUploadsPayload};
use stowage_core::{JobError, JobResultExt};

/// How many abandoned uploads one sweep handles. The scheduler re-enqueues
/// the sweep on an interval, so a deep backlog drains across runs instead of
/// monopolizing a worker.
const SWEEP_BATCH_LIMIT: i64 = 100;

/// Aborts uploads nobody has touched for longer than the configured age.
///
/// Each stale row goes through the regular abort path, so its part objects
/// get a cleanup job and any open backend multipart upload is abandoned.
pub struct SweepUploadsJobHandler;

#[async_trait]
impl JobHandler for SweepUploadsJobHandler {
    #[tracing::instrument(skip(self, job, platform), fields(job.id = %job.id))]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: SweepExpiredUploadsPayload = job.try_payload_as().unrecoverable()?;
        if payload.max_age_hours <= 0 {
            return Err(JobError::unrecoverable(anyhow!(
                "Sweep max_age_hours must be positive, got {}",
                payload.max_age_hours
            ))
            .into());
        }

        let idle_cutoff = Utc::now() - Duration::hours(payload.max_age_hours);
        let stale = platform
            .uploads
            .list_stale_uploads(idle_cutoff, SWEEP_BATCH_LIMIT)
            .await?;

        if stale.is_empty() {
            return Ok(json!({ "swept": 0 }));
        }

        let upload_service = platform.upload_service();
        let mut swept = 0usize;
        let mut failed = 0usize;
        for upload in &stale {
            match upload_service
                .abort_upload(upload.workspace_id, upload.id)
                .await
            {
                Ok(removed) => {
                    if removed {
                        swept += 1;
                        tracing::info!(
                            upload_id = %upload.id,
                            workspace_id = %upload.workspace_id,
                            idle_since = %upload.updated_at,
                            "Abandoned upload swept"
                        );
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        error = %e,
                        upload_id = %upload.id,
                        "Failed to sweep abandoned upload"
                    );
                }
            }
        }

        if swept == 0 && failed > 0 {
            return Err(anyhow!("Sweep failed for all {} stale uploads", failed));
        }

        Ok(json!({
            "swept": swept,
            "failed": failed,
        }))
    }
}
