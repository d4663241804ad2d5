use super::JobHandler;
use crate::platform::Platform;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use stowage_core::encryption::chunk_span_for_range;
use stowage_core::models::{CopyCompletionAction, CopyFilePayload, File, QueueJob};
use stowage_core::{JobError, JobResultExt};
use stowage_storage::{collect_stream, ByteRange, StorageClient};

use crate::upload::ConversionOutcome;

/// Server-side copy of a stored file into a fresh upload slot, part by part.
///
/// The copy reads the source by byte ranges aligned to the target upload's
/// part layout, re-seals each part under the target's own encryption
/// metadata, and pushes it through the regular part path so acknowledgments
/// land in the catalog. A retried job reads the acknowledged part numbers
/// first and resumes where the previous attempt stopped.
pub struct CopyFileJobHandler;

#[async_trait]
impl JobHandler for CopyFileJobHandler {
    #[tracing::instrument(
        skip(self, job, platform),
        fields(job.id = %job.id, source.id = tracing::field::Empty, upload.id = tracing::field::Empty)
    )]
    async fn process(&self, job: &QueueJob, platform: Arc<Platform>) -> Result<serde_json::Value> {
        let payload: CopyFilePayload = job.try_payload_as().unrecoverable()?;
        tracing::Span::current().record("source.id", payload.source_file_id.to_string());
        tracing::Span::current().record("upload.id", payload.target_upload_id.to_string());

        let storage = platform.storage_client().await?;

        let source = platform
            .files
            .get_file(payload.workspace_id, payload.source_file_id)
            .await?
            .ok_or_else(|| {
                // The source is gone; no number of retries brings it back.
                JobError::unrecoverable(anyhow!(
                    "Copy source file {} not found",
                    payload.source_file_id
                ))
            })?;

        let Some(upload) = platform
            .uploads
            .get_upload(payload.workspace_id, payload.target_upload_id)
            .await?
        else {
            // The target slot was aborted or swept while the job waited.
            tracing::info!("Copy target upload gone, nothing to do");
            return Ok(json!({
                "source_file_id": payload.source_file_id,
                "skipped": "target_upload_deleted",
            }));
        };

        if upload.size != source.size {
            return Err(JobError::unrecoverable(anyhow!(
                "Copy target upload size {} does not match source size {}",
                upload.size,
                source.size
            ))
            .into());
        }

        let workspace = platform
            .workspaces
            .get_workspace(payload.workspace_id)
            .await?
            .ok_or_else(|| {
                JobError::unrecoverable(anyhow!("Workspace {} not found", payload.workspace_id))
            })?;

        let already_stored: HashSet<i32> = platform
            .uploads
            .acknowledged_part_numbers(upload.id)
            .await?
            .into_iter()
            .collect();

        let upload_service = platform.upload_service();
        let mut parts_copied = 0u32;
        for part_number in 1..=upload.expected_parts {
            if already_stored.contains(&part_number) {
                continue;
            }

            let plain_start = (part_number as u64 - 1) * upload.part_size as u64;
            let plain_len = if part_number == upload.expected_parts {
                (upload.size - upload.part_size * (upload.expected_parts as i64 - 1)) as u64
            } else {
                upload.part_size as u64
            };
            let plain_end = plain_start + plain_len - 1;

            let plain = read_source_range(
                &platform,
                storage.as_ref(),
                &workspace.bucket,
                &source,
                plain_start,
                plain_end,
            )
            .await?;

            upload_service
                .store_part(payload.workspace_id, upload.id, part_number, plain)
                .await?;
            parts_copied += 1;
        }

        let parent_file_id = match payload.on_complete {
            CopyCompletionAction::FinalizeAsFile => None,
            CopyCompletionAction::FinalizeAsAttachment { parent_file_id } => Some(parent_file_id),
        };

        let outcome = upload_service
            .convert_with_parent(payload.workspace_id, upload.id, parent_file_id)
            .await?;

        match outcome {
            ConversionOutcome::Converted(file) => {
                tracing::info!(
                    file_id = %file.id,
                    parts_copied = parts_copied,
                    "Copy completed"
                );
                Ok(json!({
                    "file_id": file.id,
                    "parts_copied": parts_copied,
                }))
            }
            ConversionOutcome::NotYetCompleted {
                acknowledged,
                expected,
            } => Err(anyhow!(
                "Copy transferred every part but only {} of {} are acknowledged",
                acknowledged,
                expected
            )),
            ConversionOutcome::NotFound => {
                tracing::info!("Copy target upload deleted during transfer");
                Ok(json!({
                    "source_file_id": payload.source_file_id,
                    "skipped": "target_upload_deleted",
                }))
            }
        }
    }
}

/// Read one plaintext byte range of a stored file, decrypting when the file
/// carries encryption metadata.
async fn read_source_range(
    platform: &Arc<Platform>,
    storage: &dyn StorageClient,
    bucket: &str,
    source: &File,
    start: u64,
    end: u64,
) -> Result<Bytes> {
    let len = end - start + 1;

    if let Some(meta) = &source.encryption_meta {
        let envelope = platform.encryption()?;
        let span = chunk_span_for_range(start, end, source.size as u64);
        let cipher_range = ByteRange::new(span.cipher_start, span.cipher_start + span.cipher_len - 1);
        let stream = storage
            .download_range(bucket, &source.storage_key, cipher_range)
            .await
            .context("Failed to download source ciphertext range")?;
        let cipher = collect_stream(stream)
            .await
            .context("Failed to read source ciphertext range")?;
        let plain = envelope.decrypt_part(meta, span.first_chunk_index, &cipher)?;

        let skip = span.plain_skip as usize;
        if plain.len() < skip + len as usize {
            return Err(anyhow!(
                "Source range decrypted short: wanted {} bytes at offset {}, got {}",
                len,
                skip,
                plain.len()
            ));
        }
        Ok(plain.slice(skip..skip + len as usize))
    } else {
        let stream = storage
            .download_range(bucket, &source.storage_key, ByteRange::new(start, end))
            .await
            .context("Failed to download source range")?;
        let plain = collect_stream(stream)
            .await
            .context("Failed to read source range")?;
        if plain.len() as u64 != len {
            return Err(anyhow!(
                "Source range read short: wanted {} bytes, got {}",
                len,
                plain.len()
            ));
        }
        Ok(plain)
    }
}
