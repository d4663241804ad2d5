//! The platform registry: repositories, the serialized writer, the storage
//! client slot, the encryption envelope, and link signing, wired from one
//! configuration.
//!
//! There are no ambient globals. The storage client lives in a slot behind a
//! single setter; code that needs it either takes the `Blocked` error (job
//! handlers, which the engine then parks) or the `Option` (best-effort
//! cleanup). The platform also owns the byte-proxy read path: for managed
//! workspaces every download is decrypted here, so tokens are the only way
//! at the stored bytes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use stowage_core::encryption::{chunk_span_for_range, EncryptionEnvelope, MasterKeyRing};
use stowage_core::models::{File, SweepExpiredUploadsPayload, Workspace};
use stowage_core::signed_link::{ContentDisposition, LinkAction, LinkValidation};
use stowage_core::{PlatformConfig, PlatformError};
use stowage_db::{
    CatalogWriter, FileRepository, FolderRepository, JobRepository, NewJob, SagaRepository,
    UploadRepository, WorkspaceRepository,
};
use stowage_storage::{
    collect_stream, create_storage_client, ByteRange, StorageClient, StorageError,
};
use stowage_worker::{JobEngine, JobEngineConfig, JobHandlerContext};

use crate::cascade::{BulkDeleteService, MoveService};
use crate::links::{IssuedDownload, LinkService};
use crate::upload::UploadService;
use crate::workspace::WorkspaceService;

/// Interval between sweep enqueues. The sweep itself is a debounced queue
/// job, so an enqueue while one is still pending collapses into it.
const UPLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Uploads idle longer than this are considered abandoned.
const UPLOAD_SWEEP_MAX_AGE_HOURS: i64 = 24;

/// Shared platform state handed to every service and job handler.
pub struct Platform {
    pub config: PlatformConfig,
    pub writer: CatalogWriter,
    pub workspaces: WorkspaceRepository,
    pub folders: FolderRepository,
    pub files: FileRepository,
    pub uploads: UploadRepository,
    pub jobs: JobRepository,
    pub sagas: SagaRepository,
    pub links: LinkService,
    storage: RwLock<Option<Arc<dyn StorageClient>>>,
    encryption: Option<EncryptionEnvelope>,
}

impl Platform {
    /// Wire the platform from configuration and a ready pool.
    ///
    /// The storage client slot starts empty; install one with
    /// [`set_storage_client`](Self::set_storage_client) or let
    /// [`connect_storage`](Self::connect_storage) build the configured
    /// backend. Until then, storage-dependent operations report `Blocked`.
    pub fn new(config: PlatformConfig, pool: PgPool) -> Result<Arc<Self>, PlatformError> {
        let encryption = match &config.master_encryption_key {
            Some(encoded) => Some(EncryptionEnvelope::new(MasterKeyRing::from_base64(
                config.master_key_version,
                encoded,
            )?)),
            None => None,
        };
        let links = LinkService::new(config.link_secret.clone(), config.link_ttl_seconds);

        Ok(Arc::new(Self {
            writer: CatalogWriter::new(pool.clone()),
            workspaces: WorkspaceRepository::new(pool.clone()),
            folders: FolderRepository::new(pool.clone()),
            files: FileRepository::new(pool.clone()),
            uploads: UploadRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            sagas: SagaRepository::new(pool),
            links,
            storage: RwLock::new(None),
            encryption,
            config,
        }))
    }

    /// Build the storage backend named by configuration and install it. With
    /// no backend configured the slot stays empty and storage-dependent jobs
    /// park as blocked until a client is set.
    pub async fn connect_storage(&self) -> Result<(), PlatformError> {
        if self.config.storage_backend.is_none() {
            tracing::info!("No storage backend configured, storage operations will block");
            return Ok(());
        }
        let client = create_storage_client(&self.config).await.map_err(|e| {
            PlatformError::Storage(format!("Failed to build storage client: {}", e))
        })?;
        self.set_storage_client(client).await;
        Ok(())
    }

    pub async fn set_storage_client(&self, client: Arc<dyn StorageClient>) {
        tracing::info!(backend = %client.backend_type(), "Storage client installed");
        *self.storage.write().await = Some(client);
    }

    /// The active storage client. Absence is `Blocked`, which the job engine
    /// turns into a parked job instead of a burned retry.
    pub async fn storage_client(&self) -> Result<Arc<dyn StorageClient>, PlatformError> {
        self.storage
            .read()
            .await
            .clone()
            .ok_or_else(|| PlatformError::Blocked("No storage client configured".to_string()))
    }

    pub async fn try_storage_client(&self) -> Option<Arc<dyn StorageClient>> {
        self.storage.read().await.clone()
    }

    /// The managed-encryption envelope. Absent when no master key is
    /// configured, which blocks managed-workspace operations the same way a
    /// missing storage client does.
    pub fn encryption(&self) -> Result<&EncryptionEnvelope, PlatformError> {
        self.encryption.as_ref().ok_or_else(|| {
            PlatformError::Blocked("Master encryption key not configured".to_string())
        })
    }

    pub fn upload_service(self: &Arc<Self>) -> UploadService {
        UploadService::new(Arc::clone(self))
    }

    pub fn workspace_service(self: &Arc<Self>) -> WorkspaceService {
        WorkspaceService::new(Arc::clone(self))
    }

    pub fn move_service(self: &Arc<Self>) -> MoveService {
        MoveService::new(Arc::clone(self))
    }

    pub fn bulk_delete_service(self: &Arc<Self>) -> BulkDeleteService {
        BulkDeleteService::new(Arc::clone(self))
    }

    /// Start the background job engine wired to this platform's dispatch
    /// table. The engine holds a weak reference, so dropping the platform
    /// ends dispatch without a reference cycle.
    pub fn start_job_engine(self: &Arc<Self>) -> JobEngine {
        let context: Arc<dyn JobHandlerContext> = self.clone();
        JobEngine::new(
            self.jobs.clone(),
            self.sagas.clone(),
            self.writer.clone(),
            JobEngineConfig::from_platform(&self.config),
            Arc::downgrade(&context),
            Some(self.writer.pool().clone()),
        )
    }

    /// Start the scheduler that periodically enqueues the abandoned-upload
    /// sweep. Returns the task handle for shutdown.
    pub fn start_upload_sweep_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let platform = Arc::clone(self);
        tokio::spawn(async move {
            let mut sweep_interval = tokio::time::interval(UPLOAD_SWEEP_INTERVAL);
            loop {
                sweep_interval.tick().await;
                if let Err(e) = platform.enqueue_upload_sweep().await {
                    tracing::error!(error = %e, "Failed to enqueue upload sweep");
                }
            }
        })
    }

    async fn enqueue_upload_sweep(&self) -> Result<(), PlatformError> {
        let jobs = self.jobs.clone();
        self.writer
            .write(move |tx| {
                Box::pin(async move {
                    jobs.enqueue_job(
                        tx,
                        NewJob::from_payload(
                            None,
                            &SweepExpiredUploadsPayload {
                                max_age_hours: UPLOAD_SWEEP_MAX_AGE_HOURS,
                            },
                        ),
                    )
                    .await
                })
            })
            .await
            .map_err(PlatformError::from_any)?;
        Ok(())
    }

    /// Token authorizing one part write against an existing upload. The
    /// content type is pinned from the upload row, so a presenter cannot
    /// smuggle different bytes under a different type.
    pub async fn issue_upload_link(
        &self,
        workspace_id: Uuid,
        upload_id: Uuid,
        issuer: Uuid,
        part_number: i32,
    ) -> Result<String, PlatformError> {
        let upload = self
            .uploads
            .get_upload(workspace_id, upload_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Upload not found".to_string()))?;
        if part_number < 1 || part_number > upload.expected_parts {
            return Err(PlatformError::InvalidInput(format!(
                "Part number {} out of range 1..={}",
                part_number, upload.expected_parts
            )));
        }
        Ok(self.links.issue_upload_part_token(
            issuer,
            workspace_id,
            upload_id,
            part_number,
            &upload.content_type,
        ))
    }

    /// A download link for a completed file: an opaque token when the
    /// workspace uses managed encryption (the bytes must pass through the
    /// service to be decrypted), otherwise a direct backend URL when the
    /// backend can mint one, with a token as fallback.
    pub async fn issue_download_link(
        &self,
        workspace_id: Uuid,
        file_id: Uuid,
        issuer: Uuid,
        disposition: ContentDisposition,
    ) -> Result<IssuedDownload, PlatformError> {
        let (workspace, file) = self.readable_file(workspace_id, file_id).await?;

        if !workspace.encryption_mode.is_managed() {
            if let Some(storage) = self.try_storage_client().await {
                match storage
                    .presigned_get_url(&workspace.bucket, &file.storage_key, self.links.ttl())
                    .await
                {
                    Ok(url) => return Ok(IssuedDownload::DirectUrl(url)),
                    // Backend has no URL scheme (local filesystem); proxy.
                    Err(StorageError::ConfigError(_)) => {}
                    Err(e) => {
                        return Err(PlatformError::Storage(format!(
                            "Failed to presign download URL: {}",
                            e
                        )))
                    }
                }
            }
        }

        Ok(IssuedDownload::Token(self.links.issue_download_token(
            issuer,
            workspace_id,
            file_id,
            disposition,
            &file.name,
        )))
    }

    /// Redeem a presented download token and proxy the bytes. Nothing
    /// touches the backend until the token passes validation.
    pub async fn serve_download_token(
        &self,
        token: &str,
        identity: Uuid,
        range: Option<ByteRange>,
    ) -> Result<(File, Bytes), PlatformError> {
        let link = match self.links.validate(token, identity) {
            LinkValidation::Ok(link) => link,
            LinkValidation::Expired => {
                return Err(PlatformError::InvalidInput(
                    "Download link expired".to_string(),
                ))
            }
            LinkValidation::Forbidden => {
                return Err(PlatformError::InvalidInput(
                    "Download link was issued to another identity".to_string(),
                ))
            }
            LinkValidation::Invalid => {
                return Err(PlatformError::InvalidInput(
                    "Download link is invalid".to_string(),
                ))
            }
        };
        if !matches!(link.action, LinkAction::Download { .. }) {
            return Err(PlatformError::InvalidInput(
                "Token does not authorize a download".to_string(),
            ));
        }
        match range {
            Some(range) => {
                self.read_file_range(link.workspace_id, link.resource_id, range)
                    .await
            }
            None => self.read_file(link.workspace_id, link.resource_id).await,
        }
    }

    /// Fetch a file's full plaintext. For managed workspaces this proxy is
    /// the only read path; plaintext workspaces may also hand out direct
    /// URLs via [`issue_download_link`](Self::issue_download_link).
    pub async fn read_file(
        &self,
        workspace_id: Uuid,
        file_id: Uuid,
    ) -> Result<(File, Bytes), PlatformError> {
        let (workspace, file) = self.readable_file(workspace_id, file_id).await?;
        if file.size == 0 {
            return Ok((file, Bytes::new()));
        }
        let end = file.size as u64 - 1;
        let data = self.fetch_plaintext_range(&workspace, &file, 0, end).await?;
        Ok((file, data))
    }

    /// Fetch an inclusive plaintext byte range. The end is clamped to the
    /// last byte like an HTTP range request; a start at or past the end of
    /// the file is invalid.
    pub async fn read_file_range(
        &self,
        workspace_id: Uuid,
        file_id: Uuid,
        range: ByteRange,
    ) -> Result<(File, Bytes), PlatformError> {
        let (workspace, file) = self.readable_file(workspace_id, file_id).await?;
        if range.is_empty() {
            return Err(PlatformError::InvalidInput(
                "Byte range is empty".to_string(),
            ));
        }
        if file.size == 0 || range.start >= file.size as u64 {
            return Err(PlatformError::InvalidInput(
                "Byte range starts beyond the end of the file".to_string(),
            ));
        }
        let end = range.end.min(file.size as u64 - 1);
        let data = self
            .fetch_plaintext_range(&workspace, &file, range.start, end)
            .await?;
        Ok((file, data))
    }

    async fn readable_file(
        &self,
        workspace_id: Uuid,
        file_id: Uuid,
    ) -> Result<(Workspace, File), PlatformError> {
        let file = self
            .files
            .get_file(workspace_id, file_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("File not found".to_string()))?;
        if !file.upload_completed {
            return Err(PlatformError::NotYetReady(
                "File is still being assembled".to_string(),
            ));
        }
        let workspace = self
            .workspaces
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| PlatformError::NotFound("Workspace not found".to_string()))?;
        Ok((workspace, file))
    }

    async fn fetch_plaintext_range(
        &self,
        workspace: &Workspace,
        file: &File,
        start: u64,
        end: u64,
    ) -> Result<Bytes, PlatformError> {
        let storage = self.storage_client().await?;
        let len = (end - start + 1) as usize;

        match &file.encryption_meta {
            Some(meta) => {
                let envelope = self.encryption()?;
                let span = chunk_span_for_range(start, end, file.size as u64);
                let cipher_range =
                    ByteRange::new(span.cipher_start, span.cipher_start + span.cipher_len - 1);
                let stream = storage
                    .download_range(&workspace.bucket, &file.storage_key, cipher_range)
                    .await
                    .map_err(|e| PlatformError::Storage(format!("Range download failed: {}", e)))?;
                let cipher = collect_stream(stream)
                    .await
                    .map_err(|e| PlatformError::Storage(format!("Range download failed: {}", e)))?;
                let plain = envelope.decrypt_part(meta, span.first_chunk_index, &cipher)?;
                let skip = span.plain_skip as usize;
                if plain.len() < skip + len {
                    return Err(PlatformError::Storage(format!(
                        "Stored ciphertext shorter than expected for {}",
                        file.storage_key
                    )));
                }
                Ok(plain.slice(skip..skip + len))
            }
            None => {
                let stream = storage
                    .download_range(&workspace.bucket, &file.storage_key, ByteRange::new(start, end))
                    .await
                    .map_err(|e| PlatformError::Storage(format!("Range download failed: {}", e)))?;
                collect_stream(stream)
                    .await
                    .map_err(|e| PlatformError::Storage(format!("Range download failed: {}", e)))
            }
        }
    }
}
