//! Workspace provisioning and folder tree management.
//!
//! A workspace is one catalog row plus one bucket on the storage backend.
//! Provisioning creates the bucket first so a committed row always points at
//! a bucket that exists; teardown goes the other way around, removing the
//! rows synchronously and leaving the bucket to the cleanup saga.

use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use stowage_core::models::{CreateFolderRequest, CreateWorkspaceRequest, Folder, Workspace};
use stowage_core::PlatformError;
use stowage_storage::keys::workspace_bucket_name;

use crate::cascade::{BulkDeleteService, DeleteSummary};
use crate::platform::Platform;

#[derive(Clone)]
pub struct WorkspaceService {
    platform: Arc<Platform>,
}

impl WorkspaceService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    /// Provision a workspace: one bucket on the active backend, one catalog
    /// row recording it. The id is minted before the bucket because the
    /// bucket name embeds it. If the row insert then fails, the fresh bucket
    /// is removed best-effort so failed attempts do not accumulate buckets.
    #[tracing::instrument(skip(self, request))]
    pub async fn create_workspace(
        &self,
        request: CreateWorkspaceRequest,
    ) -> Result<Workspace, PlatformError> {
        request.validate()?;

        if request.encryption_mode.is_managed() && !self.platform.config.encryption_configured() {
            return Err(PlatformError::InvalidInput(
                "Managed encryption requires a configured master key".to_string(),
            ));
        }

        let storage = self.platform.storage_client().await?;
        if storage.backend_type() != request.storage_backend {
            return Err(PlatformError::InvalidInput(format!(
                "Requested storage backend {} but the active backend is {}",
                request.storage_backend,
                storage.backend_type()
            )));
        }

        let workspace_id = Uuid::new_v4();
        let bucket = workspace_bucket_name(workspace_id);
        storage
            .create_bucket(&bucket)
            .await
            .map_err(|e| PlatformError::Storage(format!("Failed to create bucket: {}", e)))?;

        let workspaces = self.platform.workspaces.clone();
        let created = {
            let name = request.name.clone();
            let bucket = bucket.clone();
            let owner_user_id = request.owner_user_id;
            let storage_backend = request.storage_backend;
            let encryption_mode = request.encryption_mode;
            self.platform
                .writer
                .write(move |tx| {
                    Box::pin(async move {
                        workspaces
                            .create_workspace(
                                tx,
                                workspace_id,
                                &name,
                                owner_user_id,
                                storage_backend,
                                &bucket,
                                encryption_mode,
                            )
                            .await
                    })
                })
                .await
                .map_err(PlatformError::from_any)
        };

        match created {
            Ok(workspace) => Ok(workspace),
            Err(e) => {
                if let Err(cleanup_err) = storage.delete_bucket(&bucket).await {
                    tracing::warn!(
                        error = %cleanup_err,
                        bucket = %bucket,
                        "Failed to remove bucket after workspace insert failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Create a folder. The materialized ancestor path is derived from the
    /// parent inside the same transaction, so concurrent moves cannot leave
    /// the new folder with a stale path.
    #[tracing::instrument(skip(self, request), fields(workspace_id = %workspace_id))]
    pub async fn create_folder(
        &self,
        workspace_id: Uuid,
        request: CreateFolderRequest,
    ) -> Result<Folder, PlatformError> {
        request.validate()?;

        let workspaces = self.platform.workspaces.clone();
        let folders = self.platform.folders.clone();
        self.platform
            .writer
            .write(move |tx| {
                Box::pin(async move {
                    workspaces
                        .get_workspace_in_tx(tx, workspace_id)
                        .await?
                        .ok_or_else(|| {
                            PlatformError::NotFound("Workspace not found".to_string())
                        })?;
                    folders
                        .create_folder(tx, workspace_id, &request.name, request.parent_id)
                        .await
                })
            })
            .await
            .map_err(PlatformError::from_any)
    }

    /// Tear down a workspace: every catalog row goes now, stored objects and
    /// the bucket follow through the cleanup saga.
    pub async fn delete_workspace(
        &self,
        workspace_id: Uuid,
    ) -> Result<DeleteSummary, PlatformError> {
        BulkDeleteService::new(Arc::clone(&self.platform))
            .delete_workspace(workspace_id)
            .await
    }
}
