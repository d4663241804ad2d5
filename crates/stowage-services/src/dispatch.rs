//! Dispatches queue jobs to the appropriate handler based on job type.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use stowage_core::models::{JobType, QueueJob};
use stowage_worker::JobHandlerContext;

use crate::jobs::{
    CleanupObjectsJobHandler, CompleteMultipartJobHandler, CopyFileJobHandler,
    DeleteBucketJobHandler, JobHandler, RecomputeSizeJobHandler, SweepUploadsJobHandler,
};
use crate::platform::Platform;

#[async_trait]
impl JobHandlerContext for Platform {
    async fn dispatch_job(self: Arc<Self>, job: &QueueJob) -> Result<serde_json::Value> {
        match job.job_type {
            JobType::RecomputeWorkspaceSize => {
                let handler = RecomputeSizeJobHandler;
                handler.process(job, self).await
            }
            JobType::CompleteMultipartUpload => {
                let handler = CompleteMultipartJobHandler;
                handler.process(job, self).await
            }
            JobType::CopyFile => {
                let handler = CopyFileJobHandler;
                handler.process(job, self).await
            }
            JobType::CleanupStoredObjects => {
                let handler = CleanupObjectsJobHandler;
                handler.process(job, self).await
            }
            JobType::DeleteBucket => {
                let handler = DeleteBucketJobHandler;
                handler.process(job, self).await
            }
            JobType::SweepExpiredUploads => {
                let handler = SweepUploadsJobHandler;
                handler.process(job, self).await
            }
        }
    }
}
