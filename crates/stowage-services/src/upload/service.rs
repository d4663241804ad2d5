//! Upload lifecycle orchestration.
//!
//! An upload is a catalog row plus zero or more backend part uploads. The
//! service keeps the two in step: backend calls (multipart initiation, part
//! uploads, aborts) happen outside the catalog writer, and every catalog
//! mutation goes through one writer transaction. Conversion is the only path
//! that turns an upload into a `File`.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;
use validator::Validate;

use stowage_core::encryption::chunk_index_for_offset;
use stowage_core::models::{
    CleanupStoredObjectsPayload, CompleteMultipartUploadPayload, CompletedPartRecord,
    CopyCompletionAction, CopyFilePayload, CreateUploadRequest, File, FileUpload, Priority,
    RecomputeWorkspaceSizePayload,
};
use stowage_core::PlatformError;
use stowage_db::{CommitEffect, NewFile, NewJob, NewUpload};
use stowage_storage::keys::file_storage_key;

use crate::platform::Platform;
use crate::upload::algorithm::resolve_upload_algorithm;

/// Result of acknowledging one part.
#[derive(Debug, Clone, Copy)]
pub struct AcknowledgeOutcome {
    /// False when this part number had already been acknowledged.
    pub newly_recorded: bool,
    pub acknowledged_parts: i64,
    pub expected_parts: i32,
}

impl AcknowledgeOutcome {
    pub fn all_parts_acknowledged(&self) -> bool {
        self.acknowledged_parts >= self.expected_parts as i64
    }
}

/// Result of attempting to convert an upload into a file.
#[derive(Debug)]
pub enum ConversionOutcome {
    Converted(File),
    /// Not all expected parts are acknowledged yet. The caller retries after
    /// more parts land; this is a normal state, not an error.
    NotYetCompleted { acknowledged: i64, expected: i32 },
    NotFound,
}

/// Orchestrates the upload state machine from creation to conversion.
#[derive(Clone)]
pub struct UploadService {
    platform: Arc<Platform>,
}

impl UploadService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    /// Create an in-flight upload: pick the transfer algorithm from the size
    /// and the workspace's encryption mode, mint encryption metadata for
    /// managed workspaces, initiate the backend multipart upload when the
    /// plan needs one, then insert the catalog row.
    ///
    /// The multipart initiation happens before the writer transaction so the
    /// catalog gate never waits on the backend. If the insert then fails, the
    /// orphaned backend upload is aborted best-effort.
    #[tracing::instrument(skip(self, request), fields(workspace_id = %workspace_id))]
    pub async fn create_upload(
        &self,
        workspace_id: Uuid,
        owner_user_id: Uuid,
        request: CreateUploadRequest,
    ) -> Result<FileUpload, PlatformError> {
        request.validate()?;

        let workspace = self
            .platform
            .workspaces
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Workspace not found".to_string()))?;

        if let Some(folder_id) = request.folder_id {
            self.platform
                .folders
                .get_folder(workspace_id, folder_id)
                .await?
                .ok_or_else(|| PlatformError::NotFound("Folder not found".to_string()))?;
        }

        let plan = resolve_upload_algorithm(request.size, workspace.encryption_mode);
        let encryption_meta = if workspace.encryption_mode.is_managed() {
            Some(self.platform.encryption()?.generate_meta())
        } else {
            None
        };

        // The storage key is minted here, independent of the future file id.
        let storage_key = file_storage_key(Uuid::new_v4());

        let multipart_upload_id = if plan.algorithm.requires_multipart_completion() {
            let storage = self.platform.storage_client().await?;
            let id = storage
                .initiate_multipart(&workspace.bucket, &storage_key, &request.content_type)
                .await
                .map_err(|e| {
                    PlatformError::Storage(format!("Failed to initiate multipart upload: {}", e))
                })?;
            Some(id)
        } else {
            None
        };

        let new_upload = NewUpload {
            workspace_id,
            folder_id: request.folder_id,
            name: request.name,
            storage_key,
            size: request.size as i64,
            content_type: request.content_type,
            encryption_meta,
            algorithm: plan.algorithm,
            expected_parts: plan.part_count,
            part_size: plan.part_size,
            multipart_upload_id: multipart_upload_id.clone(),
            owner_user_id,
        };

        let uploads = self.platform.uploads.clone();
        let inserted = {
            let new_upload = new_upload.clone();
            self.platform
                .writer
                .write(move |tx| Box::pin(async move { uploads.create_upload(tx, &new_upload).await }))
                .await
                .map_err(PlatformError::from_any)
        };

        match inserted {
            Ok(upload) => {
                tracing::info!(
                    upload_id = %upload.id,
                    algorithm = %upload.algorithm,
                    expected_parts = upload.expected_parts,
                    "Upload created"
                );
                Ok(upload)
            }
            Err(e) => {
                if let Some(upload_id) = multipart_upload_id {
                    self.abort_orphaned_multipart(
                        &workspace.bucket,
                        &new_upload.storage_key,
                        &upload_id,
                    )
                    .await;
                }
                Err(e)
            }
        }
    }

    async fn abort_orphaned_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Some(storage) = self.platform.try_storage_client().await {
            if let Err(e) = storage.abort_multipart(bucket, key, upload_id).await {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Failed to abort backend multipart upload after catalog insert failed"
                );
            }
        }
    }

    /// Begin a server-side copy of a stored file: create a fresh upload shell
    /// sized like the source in the destination folder, then enqueue the job
    /// that streams the bytes across. The returned upload tracks progress
    /// like any other; the job converts it once every part has landed.
    ///
    /// A crash between the shell insert and the enqueue leaves an idle upload
    /// row, reclaimed by the abandoned-upload sweep.
    #[tracing::instrument(
        skip(self),
        fields(workspace_id = %workspace_id, source_file_id = %source_file_id)
    )]
    pub async fn begin_copy(
        &self,
        workspace_id: Uuid,
        source_file_id: Uuid,
        owner_user_id: Uuid,
        destination_folder_id: Option<Uuid>,
        on_complete: CopyCompletionAction,
    ) -> Result<FileUpload, PlatformError> {
        let source = self
            .platform
            .files
            .get_file(workspace_id, source_file_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Source file not found".to_string()))?;
        if !source.upload_completed {
            return Err(PlatformError::NotYetReady(
                "Source file is still being assembled".to_string(),
            ));
        }
        if let CopyCompletionAction::FinalizeAsAttachment { parent_file_id } = &on_complete {
            self.platform
                .files
                .get_file(workspace_id, *parent_file_id)
                .await?
                .ok_or_else(|| PlatformError::NotFound("Parent file not found".to_string()))?;
        }

        let upload = self
            .create_upload(
                workspace_id,
                owner_user_id,
                CreateUploadRequest {
                    name: source.name.clone(),
                    content_type: source.content_type.clone(),
                    size: source.size as u64,
                    folder_id: destination_folder_id,
                },
            )
            .await?;

        let jobs = self.platform.jobs.clone();
        let payload = CopyFilePayload {
            source_file_id,
            target_upload_id: upload.id,
            workspace_id,
            on_complete,
        };
        self.platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    jobs.enqueue_job(tx, NewJob::from_payload(Some(workspace_id), &payload))
                        .await?;
                    Ok::<_, PlatformError>(())
                })
            })
            .await
            .map_err(PlatformError::from_any)?;

        tracing::info!(
            upload_id = %upload.id,
            source_file_id = %source_file_id,
            "File copy scheduled"
        );
        Ok(upload)
    }

    /// Store one part's bytes through the platform: seal them when the
    /// upload carries encryption metadata, push them to the backend, then
    /// record the acknowledged part. This is the only write path for managed
    /// workspaces; plaintext workspaces may instead upload directly via a
    /// pre-signed URL and call [`acknowledge_part`](Self::acknowledge_part)
    /// with the backend's etag.
    #[tracing::instrument(
        skip(self, data),
        fields(workspace_id = %workspace_id, upload_id = %upload_id, part_number = part_number)
    )]
    pub async fn store_part(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
        part_number: i32,
        data: Bytes,
    ) -> Result<AcknowledgeOutcome, PlatformError> {
        let upload = self
            .platform
            .uploads
            .get_upload(workspace_id, upload_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Upload not found".to_string()))?;

        check_part_bounds(&upload, part_number, data.len() as i64)?;

        let workspace = self
            .platform
            .workspaces
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Workspace not found".to_string()))?;

        let payload = match &upload.encryption_meta {
            Some(meta) => {
                // Parts of an encrypted upload are chunk-aligned, so the part
                // offset maps to a whole starting chunk index.
                let plain_offset = (part_number as u64 - 1) * upload.part_size as u64;
                let first_chunk = chunk_index_for_offset(plain_offset);
                self.platform
                    .encryption()?
                    .encrypt_part(meta, first_chunk, &data)?
            }
            None => data,
        };

        let storage = self.platform.storage_client().await?;
        let etag = if upload.algorithm.requires_multipart_completion() {
            let multipart_id = upload.multipart_upload_id.as_deref().ok_or_else(|| {
                PlatformError::Fatal(format!(
                    "Upload {} uses a multipart algorithm but has no backend upload id",
                    upload_id
                ))
            })?;
            storage
                .upload_part(
                    &workspace.bucket,
                    &upload.storage_key,
                    multipart_id,
                    part_number,
                    payload,
                )
                .await
                .map_err(|e| PlatformError::Storage(format!("Part upload failed: {}", e)))?
        } else {
            storage
                .upload(
                    &workspace.bucket,
                    &upload.storage_key,
                    &upload.content_type,
                    payload,
                )
                .await
                .map_err(|e| PlatformError::Storage(format!("Upload failed: {}", e)))?
        };

        self.acknowledge_part(workspace_id, upload_id, part_number, &etag)
            .await
    }

    /// Record one acknowledged part. Idempotent per part number; the etag of
    /// the first acknowledgement wins.
    pub async fn acknowledge_part(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
        part_number: i32,
        etag: &str,
    ) -> Result<AcknowledgeOutcome, PlatformError> {
        let uploads = self.platform.uploads.clone();
        let etag = etag.to_string();
        self.platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    let upload = uploads
                        .get_upload_in_tx(tx, workspace_id, upload_id)
                        .await?
                        .ok_or_else(|| PlatformError::NotFound("Upload not found".to_string()))?;

                    if part_number < 1 || part_number > upload.expected_parts {
                        return Err(PlatformError::InvalidInput(format!(
                            "Part number {} outside expected range 1..={}",
                            part_number, upload.expected_parts
                        )));
                    }

                    let newly_recorded =
                        uploads.record_part(tx, upload_id, part_number, &etag).await?;
                    let acknowledged_parts = uploads.count_parts(tx, upload_id).await?;

                    Ok::<_, PlatformError>(AcknowledgeOutcome {
                        newly_recorded,
                        acknowledged_parts,
                        expected_parts: upload.expected_parts,
                    })
                })
            })
            .await
            .map_err(PlatformError::from_any)
    }

    /// Convert a fully acknowledged upload into a file. In one writer
    /// transaction: insert the file row, enqueue the backend multipart
    /// completion when the algorithm needs one plus a debounced workspace
    /// size recompute, and delete the upload. An upload with missing parts
    /// reports `NotYetCompleted` and is left untouched.
    pub async fn convert_upload_to_file(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
    ) -> Result<ConversionOutcome, PlatformError> {
        self.convert_with_parent(workspace_id, upload_id, None).await
    }

    /// Conversion with an optional parent link, used by the copy job to
    /// finalize derived artifacts. `parent_file_id` lands on the new file
    /// row untouched.
    pub(crate) async fn convert_with_parent(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
        parent_file_id: Option<Uuid>,
    ) -> Result<ConversionOutcome, PlatformError> {
        let uploads = self.platform.uploads.clone();
        let files = self.platform.files.clone();
        let workspaces = self.platform.workspaces.clone();
        let jobs = self.platform.jobs.clone();

        let outcome = self
            .platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    let Some(upload) =
                        uploads.get_upload_in_tx(tx, workspace_id, upload_id).await?
                    else {
                        return Ok(ConversionOutcome::NotFound);
                    };

                    let acknowledged = uploads.count_parts(tx, upload_id).await?;
                    if acknowledged != upload.expected_parts as i64 {
                        return Ok(ConversionOutcome::NotYetCompleted {
                            acknowledged,
                            expected: upload.expected_parts,
                        });
                    }

                    let needs_completion = upload.algorithm.requires_multipart_completion();
                    let file = files
                        .insert_file(
                            tx,
                            &NewFile {
                                workspace_id,
                                folder_id: upload.folder_id,
                                name: upload.name.clone(),
                                storage_key: upload.storage_key.clone(),
                                size: upload.size,
                                content_type: upload.content_type.clone(),
                                encryption_meta: upload.encryption_meta.clone(),
                                upload_completed: !needs_completion,
                                parent_file_id,
                            },
                        )
                        .await?;

                    if needs_completion {
                        let workspace = workspaces
                            .get_workspace_in_tx(tx, workspace_id)
                            .await?
                            .ok_or_else(|| {
                                PlatformError::NotFound("Workspace not found".to_string())
                            })?;
                        let multipart_upload_id =
                            upload.multipart_upload_id.clone().ok_or_else(|| {
                                PlatformError::Fatal(format!(
                                    "Upload {} uses a multipart algorithm but has no backend upload id",
                                    upload_id
                                ))
                            })?;
                        let parts = uploads
                            .acknowledged_parts(tx, upload_id)
                            .await?
                            .into_iter()
                            .map(|part| CompletedPartRecord {
                                part_number: part.part_number,
                                etag: part.etag,
                            })
                            .collect();
                        jobs.enqueue_job(
                            tx,
                            NewJob::from_payload(
                                Some(workspace_id),
                                &CompleteMultipartUploadPayload {
                                    file_id: file.id,
                                    workspace_id,
                                    bucket: workspace.bucket,
                                    storage_key: file.storage_key.clone(),
                                    multipart_upload_id,
                                    parts,
                                },
                            )
                            .with_priority(Priority::High),
                        )
                        .await?;
                    }

                    jobs.enqueue_job(
                        tx,
                        NewJob::from_payload(
                            Some(workspace_id),
                            &RecomputeWorkspaceSizePayload { workspace_id },
                        ),
                    )
                    .await?;

                    uploads.delete_upload(tx, workspace_id, upload_id).await?;

                    Ok::<_, PlatformError>(ConversionOutcome::Converted(file))
                })
            })
            .await
            .map_err(PlatformError::from_any)?;

        if let ConversionOutcome::Converted(file) = &outcome {
            tracing::info!(
                file_id = %file.id,
                workspace_id = %workspace_id,
                size = file.size,
                "Upload converted to file"
            );
        }
        Ok(outcome)
    }

    /// Remove an in-flight upload. The catalog rows go in one writer
    /// transaction together with a storage cleanup job for the staged
    /// object; the backend multipart abort runs as a post-commit effect.
    /// Returns false when no such upload existed.
    #[tracing::instrument(skip(self), fields(workspace_id = %workspace_id, upload_id = %upload_id))]
    pub async fn abort_upload(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
    ) -> Result<bool, PlatformError> {
        let uploads = self.platform.uploads.clone();
        let workspaces = self.platform.workspaces.clone();
        let jobs = self.platform.jobs.clone();
        let storage = self.platform.try_storage_client().await;

        self.platform
            .writer
            .write_with_effect(move |tx| {
                Box::pin(async move {
                    let Some(upload) = uploads.delete_upload(tx, workspace_id, upload_id).await?
                    else {
                        return Ok::<_, PlatformError>((false, None));
                    };

                    let workspace = workspaces
                        .get_workspace_in_tx(tx, workspace_id)
                        .await?
                        .ok_or_else(|| PlatformError::NotFound("Workspace not found".to_string()))?;

                    jobs.enqueue_job(
                        tx,
                        NewJob::from_payload(
                            Some(workspace_id),
                            &CleanupStoredObjectsPayload {
                                workspace_id,
                                bucket: workspace.bucket.clone(),
                                storage_keys: vec![upload.storage_key.clone()],
                            },
                        ),
                    )
                    .await?;

                    let effect: Option<CommitEffect> =
                        match (storage, upload.multipart_upload_id.clone()) {
                            (Some(storage), Some(multipart_id)) => {
                                let bucket = workspace.bucket;
                                let key = upload.storage_key;
                                Some(Box::pin(async move {
                                    if let Err(e) =
                                        storage.abort_multipart(&bucket, &key, &multipart_id).await
                                    {
                                        tracing::warn!(
                                            error = %e,
                                            key = %key,
                                            "Failed to abort backend multipart upload"
                                        );
                                    }
                                }))
                            }
                            (None, Some(_)) => {
                                tracing::warn!(
                                    upload_id = %upload_id,
                                    "No storage client configured, backend multipart left for bucket hygiene"
                                );
                                None
                            }
                            _ => None,
                        };

                    Ok((true, effect))
                })
            })
            .await
            .map_err(PlatformError::from_any)
    }
}

/// Parts must slot exactly into the upload plan: every part but the last is
/// exactly `part_size` bytes, the last carries the remainder. Encrypted
/// uploads depend on this for their chunk indexing.
fn check_part_bounds(upload: &FileUpload, part_number: i32, len: i64) -> Result<(), PlatformError> {
    if part_number < 1 || part_number > upload.expected_parts {
        return Err(PlatformError::InvalidInput(format!(
            "Part number {} outside expected range 1..={}",
            part_number, upload.expected_parts
        )));
    }
    let expected_len = if part_number < upload.expected_parts {
        upload.part_size
    } else {
        upload.size - upload.part_size * (upload.expected_parts as i64 - 1)
    };
    if len != expected_len {
        return Err(PlatformError::InvalidInput(format!(
            "Part {} must be {} bytes, got {}",
            part_number, expected_len, len
        )));
    }
    Ok(())
}
