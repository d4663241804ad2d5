//! Bulk delete cascades.
//!
//! Deleting a folder subtree or a whole workspace removes every dependent
//! catalog row in one writer transaction, in an order that satisfies the
//! deferred foreign keys at commit: derived artifacts, then files, then
//! uploads, then stale copy jobs, then folders. Storage objects are not
//! touched inline; each batch of doomed object keys becomes a saga step job,
//! and the saga's terminal job runs once every batch is done.

use std::sync::Arc;

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use stowage_core::models::{
    CleanupStoredObjectsPayload, DeleteBucketPayload, FileUpload, JobPayload, Priority, QueueJob,
    RecomputeWorkspaceSizePayload, Saga,
};
use stowage_core::PlatformError;
use stowage_db::{defer_constraints, CommitEffect, JobRepository, NewJob, SagaRepository};
use stowage_storage::StorageClient;

use crate::platform::Platform;

/// Storage keys per cleanup step job. Small enough that one job is a quick
/// unit of retry, large enough that big cascades do not flood the queue.
const CLEANUP_BATCH_KEYS: usize = 256;

/// What one cascade removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub folders: u64,
    pub files: u64,
    pub uploads: u64,
    pub copy_jobs: u64,
    /// Logical bytes of the deleted files (uploads in flight are not
    /// counted in workspace size and are excluded here too).
    pub bytes: i64,
}

/// A backend multipart to abort once the cascade committed.
struct PendingMultipartAbort {
    bucket: String,
    storage_key: String,
    multipart_upload_id: String,
}

/// Orchestrates folder-subtree and whole-workspace delete cascades.
#[derive(Clone)]
pub struct BulkDeleteService {
    platform: Arc<Platform>,
}

impl BulkDeleteService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    /// Delete folder subtrees: the given roots, every folder inside them, and
    /// all files and uploads those folders hold. Folders are tombstoned so
    /// sibling ancestor paths stay intact; files and uploads are removed
    /// outright. The saga terminates in a debounced workspace size recompute.
    ///
    /// Roots that do not exist (or live in another workspace) contribute
    /// nothing; deleting nothing is a valid cascade with an all-zero summary.
    #[tracing::instrument(skip(self, folder_ids), fields(workspace_id = %workspace_id))]
    pub async fn delete_folders(
        &self,
        workspace_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<DeleteSummary, PlatformError> {
        if folder_ids.is_empty() {
            return Ok(DeleteSummary::default());
        }

        let folders = self.platform.folders.clone();
        let files = self.platform.files.clone();
        let uploads = self.platform.uploads.clone();
        let jobs = self.platform.jobs.clone();
        let sagas = self.platform.sagas.clone();
        let workspaces = self.platform.workspaces.clone();
        let storage = self.platform.try_storage_client().await;
        let roots = folder_ids.to_vec();

        let summary = self
            .platform
            .writer
            .write_with_effect(move |tx| {
                Box::pin(async move {
                    defer_constraints(tx).await.map_err(PlatformError::from)?;

                    let workspace = workspaces
                        .get_workspace_in_tx(tx, workspace_id)
                        .await?
                        .ok_or_else(|| {
                            PlatformError::NotFound("Workspace not found".to_string())
                        })?;

                    let doomed = folders
                        .descendant_folder_ids(tx, workspace_id, &roots)
                        .await?;

                    let in_scope = files
                        .select_files_in_folders(tx, workspace_id, &doomed)
                        .await?;
                    let file_ids: Vec<Uuid> = in_scope.iter().map(|f| f.id).collect();

                    // Derived artifacts can live outside the doomed folders;
                    // follow the parent link so they go with their parents.
                    let mut deleted_files = files
                        .delete_derived_artifacts(tx, workspace_id, &file_ids)
                        .await?;
                    deleted_files.extend(
                        files
                            .delete_files_by_ids(tx, workspace_id, &file_ids)
                            .await?,
                    );

                    let deleted_uploads = {
                        let ids: Vec<Uuid> = uploads
                            .select_uploads_in_folders(tx, workspace_id, &doomed)
                            .await?
                            .iter()
                            .map(|u| u.id)
                            .collect();
                        uploads.delete_uploads_by_ids(tx, workspace_id, &ids).await?
                    };
                    let upload_ids: Vec<Uuid> = deleted_uploads.iter().map(|u| u.id).collect();

                    let copy_jobs = jobs
                        .delete_pending_copy_jobs_targeting_uploads(tx, workspace_id, &upload_ids)
                        .await?;

                    let folder_count = folders
                        .soft_delete_folders(tx, workspace_id, &doomed)
                        .await?;

                    let summary = DeleteSummary {
                        folders: folder_count,
                        files: deleted_files.len() as u64,
                        uploads: deleted_uploads.len() as u64,
                        copy_jobs,
                        bytes: deleted_files.iter().map(|f| f.size).sum(),
                    };

                    let mut doomed_keys: Vec<String> =
                        deleted_files.iter().map(|f| f.storage_key.clone()).collect();
                    doomed_keys.extend(deleted_uploads.iter().map(|u| u.storage_key.clone()));

                    let saga = sagas
                        .create_saga(
                            tx,
                            workspace_id,
                            RecomputeWorkspaceSizePayload::job_type(),
                            QueueJob::payload_from(&RecomputeWorkspaceSizePayload { workspace_id }),
                        )
                        .await?;
                    fan_out_cleanup(
                        &jobs,
                        &sagas,
                        tx,
                        &saga,
                        workspace_id,
                        &workspace.bucket,
                        doomed_keys,
                    )
                    .await?;

                    let effect =
                        multipart_abort_effect(storage, &workspace.bucket, &deleted_uploads);
                    Ok::<_, PlatformError>((summary, effect))
                })
            })
            .await
            .map_err(PlatformError::from_any)?;

        tracing::info!(
            workspace_id = %workspace_id,
            folders = summary.folders,
            files = summary.files,
            uploads = summary.uploads,
            bytes = summary.bytes,
            "Folder cascade deleted"
        );
        Ok(summary)
    }

    /// Delete a workspace and everything in it. Jobs still waiting to run
    /// against the workspace are purged first, then files, uploads, folder
    /// rows (tombstones included) and the workspace row itself go in one
    /// transaction. The saga terminates in bucket teardown, which must
    /// outlive the catalog rows and therefore rides the no-FK queue tables.
    #[tracing::instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub async fn delete_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<DeleteSummary, PlatformError> {
        let folders = self.platform.folders.clone();
        let files = self.platform.files.clone();
        let uploads = self.platform.uploads.clone();
        let jobs = self.platform.jobs.clone();
        let sagas = self.platform.sagas.clone();
        let workspaces = self.platform.workspaces.clone();
        let storage = self.platform.try_storage_client().await;

        let summary = self
            .platform
            .writer
            .write_with_effect(move |tx| {
                Box::pin(async move {
                    defer_constraints(tx).await.map_err(PlatformError::from)?;

                    let deleted_files = {
                        let ids: Vec<Uuid> = files
                            .select_all_workspace_files(tx, workspace_id)
                            .await?
                            .iter()
                            .map(|f| f.id)
                            .collect();
                        files.delete_files_by_ids(tx, workspace_id, &ids).await?
                    };

                    let deleted_uploads = {
                        let ids: Vec<Uuid> = uploads
                            .select_all_workspace_uploads(tx, workspace_id)
                            .await?
                            .iter()
                            .map(|u| u.id)
                            .collect();
                        uploads.delete_uploads_by_ids(tx, workspace_id, &ids).await?
                    };
                    let upload_ids: Vec<Uuid> = deleted_uploads.iter().map(|u| u.id).collect();

                    let copy_jobs = jobs
                        .delete_pending_copy_jobs_targeting_uploads(tx, workspace_id, &upload_ids)
                        .await?;
                    jobs.delete_undispatched_workspace_jobs(tx, workspace_id)
                        .await?;

                    let folder_count =
                        folders.delete_all_workspace_folders(tx, workspace_id).await?;

                    let workspace = workspaces
                        .delete_workspace(tx, workspace_id)
                        .await?
                        .ok_or_else(|| {
                            PlatformError::NotFound("Workspace not found".to_string())
                        })?;

                    let summary = DeleteSummary {
                        folders: folder_count,
                        files: deleted_files.len() as u64,
                        uploads: deleted_uploads.len() as u64,
                        copy_jobs,
                        bytes: deleted_files.iter().map(|f| f.size).sum(),
                    };

                    let mut doomed_keys: Vec<String> =
                        deleted_files.iter().map(|f| f.storage_key.clone()).collect();
                    doomed_keys.extend(deleted_uploads.iter().map(|u| u.storage_key.clone()));

                    let saga = sagas
                        .create_saga(
                            tx,
                            workspace_id,
                            DeleteBucketPayload::job_type(),
                            QueueJob::payload_from(&DeleteBucketPayload {
                                workspace_id,
                                bucket: workspace.bucket.clone(),
                            }),
                        )
                        .await?;
                    fan_out_cleanup(
                        &jobs,
                        &sagas,
                        tx,
                        &saga,
                        workspace_id,
                        &workspace.bucket,
                        doomed_keys,
                    )
                    .await?;

                    let effect =
                        multipart_abort_effect(storage, &workspace.bucket, &deleted_uploads);
                    Ok::<_, PlatformError>((summary, effect))
                })
            })
            .await
            .map_err(PlatformError::from_any)?;

        tracing::info!(
            workspace_id = %workspace_id,
            folders = summary.folders,
            files = summary.files,
            uploads = summary.uploads,
            copy_jobs = summary.copy_jobs,
            "Workspace cascade deleted"
        );
        Ok(summary)
    }
}

/// Enqueue one saga-tracked cleanup job per batch of doomed keys, register
/// the steps, and claim the terminal enqueue when there are no steps at all.
async fn fan_out_cleanup(
    jobs: &JobRepository,
    sagas: &SagaRepository,
    tx: &mut Transaction<'_, Postgres>,
    saga: &Saga,
    workspace_id: Uuid,
    bucket: &str,
    doomed_keys: Vec<String>,
) -> Result<(), PlatformError> {
    let mut steps = 0;
    for batch in doomed_keys.chunks(CLEANUP_BATCH_KEYS) {
        let enqueued = jobs
            .enqueue_job(
                tx,
                NewJob::from_payload(
                    Some(workspace_id),
                    &CleanupStoredObjectsPayload {
                        workspace_id,
                        bucket: bucket.to_string(),
                        storage_keys: batch.to_vec(),
                    },
                )
                .with_saga(saga.id),
            )
            .await?;
        if enqueued.is_some() {
            steps += 1;
        }
    }

    if steps > 0 {
        sagas.add_steps(tx, saga.id, steps).await?;
    }
    if let Some(complete) = sagas.try_claim_terminal(tx, saga.id).await? {
        enqueue_terminal(jobs, tx, &complete).await?;
    }
    Ok(())
}

/// Enqueue a saga's terminal job as a plain job. Mirrors the job engine's
/// terminal enqueue so restarts and zero-step sagas behave identically.
async fn enqueue_terminal(
    jobs: &JobRepository,
    tx: &mut Transaction<'_, Postgres>,
    saga: &Saga,
) -> Result<(), PlatformError> {
    let terminal = NewJob {
        workspace_id: Some(saga.workspace_id),
        job_type: saga.terminal_job_type.clone(),
        payload: saga.terminal_payload.clone(),
        priority: Priority::Normal,
        debounce_key: saga.terminal_debounce_key(),
        saga_id: None,
        scheduled_at: None,
        max_retries: None,
        timeout_seconds: None,
    };
    if jobs.enqueue_job(tx, terminal).await?.is_none() {
        tracing::debug!(
            saga_id = %saga.id,
            "Terminal job collapsed into an undispatched equivalent"
        );
    }
    Ok(())
}

/// Post-commit best-effort abort of the backend multiparts that belonged to
/// deleted uploads. Failures only warn: the staged parts are unreachable
/// once the catalog rows are gone, and bucket teardown removes them anyway.
fn multipart_abort_effect(
    storage: Option<Arc<dyn StorageClient>>,
    bucket: &str,
    deleted_uploads: &[FileUpload],
) -> Option<CommitEffect> {
    let aborts: Vec<PendingMultipartAbort> = deleted_uploads
        .iter()
        .filter_map(|upload| {
            upload
                .multipart_upload_id
                .as_ref()
                .map(|id| PendingMultipartAbort {
                    bucket: bucket.to_string(),
                    storage_key: upload.storage_key.clone(),
                    multipart_upload_id: id.clone(),
                })
        })
        .collect();
    if aborts.is_empty() {
        return None;
    }
    let Some(storage) = storage else {
        tracing::warn!(
            pending = aborts.len(),
            "No storage client configured, backend multiparts left for bucket hygiene"
        );
        return None;
    };

    Some(Box::pin(async move {
        for abort in aborts {
            if let Err(e) = storage
                .abort_multipart(
                    &abort.bucket,
                    &abort.storage_key,
                    &abort.multipart_upload_id,
                )
                .await
            {
                tracing::warn!(
                    error = %e,
                    key = %abort.storage_key,
                    "Failed to abort backend multipart upload"
                );
            }
        }
    }))
}
