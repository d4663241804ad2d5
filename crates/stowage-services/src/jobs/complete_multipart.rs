use super::JobHandler;
use crate::platform::Platform;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use stowage_core::models::{
    CleanupStoredObjectsPayload, CompleteMultipartUploadPayload, QueueJob,
    RecomputeWorkspaceSizePayload,
};
use stowage_core::{JobResultExt, PlatformError};
use stowage_db::NewJob;
use stowage_storage::{ByteRange, UploadedPart};

/// Asks the backend to assemble an already-transferred multipart upload,
/// then flips the file's `upload_completed` flag.
///
/// The backend call and the catalog update cannot be atomic, so the handler
/// is written to converge across retries: a completion error is probed
/// against the final object (a crash after assembly leaves an invalid upload
/// id but an existing object), and a file row deleted mid-flight turns the
/// assembled object into a scheduled cleanup instead of an orphan.
pub struct CompleteMultipartJobHandler;

#[async_trait]
impl JobHandler for CompleteMultipartJobHandler {
    #[tracing::instrument(
        skip(self, job, platform),
        fields(job.id = %job.id, file.id = tracing::field::Empty)
    )]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: CompleteMultipartUploadPayload = job.try_payload_as().unrecoverable()?;
        tracing::Span::current().record("file.id", payload.file_id.to_string());

        let storage = platform.storage_client().await?;

        let file = platform
            .files
            .get_file(payload.workspace_id, payload.file_id)
            .await?;

        let Some(file) = file else {
            // The file row was cascade-deleted while this job waited. The
            // parts were never assembled; abort so the backend reclaims them.
            if let Err(e) = storage
                .abort_multipart(
                    &payload.bucket,
                    &payload.storage_key,
                    &payload.multipart_upload_id,
                )
                .await
            {
                tracing::warn!(
                    error = %e,
                    storage_key = %payload.storage_key,
                    "Failed to abort multipart upload of a deleted file"
                );
            }
            return Ok(json!({
                "file_id": payload.file_id,
                "skipped": "file_deleted",
            }));
        };

        if file.upload_completed {
            return Ok(json!({
                "file_id": payload.file_id,
                "skipped": "already_completed",
            }));
        }

        let parts: Vec<UploadedPart> = payload
            .parts
            .iter()
            .map(|p| UploadedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        if let Err(e) = storage
            .complete_multipart(
                &payload.bucket,
                &payload.storage_key,
                &payload.multipart_upload_id,
                &parts,
            )
            .await
        {
            // A retry after a crash between backend assembly and the catalog
            // update hits an invalid upload id. Probe the final object: if it
            // exists, the earlier attempt finished and only the flag is left.
            let probe = storage
                .download_range(&payload.bucket, &payload.storage_key, ByteRange::new(0, 0))
                .await;
            if probe.is_err() {
                return Err(e).context("Multipart completion failed");
            }
            tracing::info!(
                storage_key = %payload.storage_key,
                "Object already assembled by an earlier attempt"
            );
        }

        let files = platform.files.clone();
        let jobs = platform.jobs.clone();
        let workspace_id = payload.workspace_id;
        let file_id = payload.file_id;
        let bucket = payload.bucket.clone();
        let storage_key = payload.storage_key.clone();
        let marked = platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    let marked = files.mark_upload_completed(tx, workspace_id, file_id).await?;
                    match marked {
                        Some(file) => {
                            jobs.enqueue_job(
                                tx,
                                NewJob::from_payload(
                                    Some(workspace_id),
                                    &RecomputeWorkspaceSizePayload { workspace_id },
                                ),
                            )
                            .await?;
                            Ok::<_, PlatformError>(Some(file))
                        }
                        None => {
                            // Deleted after assembly started: the object now
                            // exists under a key nothing references.
                            jobs.enqueue_job(
                                tx,
                                NewJob::from_payload(
                                    Some(workspace_id),
                                    &CleanupStoredObjectsPayload {
                                        workspace_id,
                                        bucket,
                                        storage_keys: vec![storage_key],
                                    },
                                ),
                            )
                            .await?;
                            Ok(None)
                        }
                    }
                })
            })
            .await
            .map_err(PlatformError::from_any)?;

        match marked {
            Some(_) => {
                tracing::info!(
                    file_id = %file_id,
                    parts = parts.len(),
                    "Multipart upload completed"
                );
                Ok(json!({
                    "file_id": file_id,
                    "parts": parts.len(),
                }))
            }
            None => {
                tracing::warn!(
                    file_id = %file_id,
                    "File deleted during completion, assembled object scheduled for cleanup"
                );
                Ok(json!({
                    "file_id": file_id,
                    "skipped": "file_deleted_after_assembly",
                }))
            }
        }
    }
}
