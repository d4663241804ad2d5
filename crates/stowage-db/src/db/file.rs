use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::encryption::EncryptionMeta;
use stowage_core::models::File;
use stowage_core::PlatformError;

/// Attributes for a new file row, copied from the upload (or the copy job)
/// that produced it.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub workspace_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub content_type: String,
    pub encryption_meta: Option<EncryptionMeta>,
    /// False when a backend multipart completion is still outstanding; the
    /// completion job flips it.
    pub upload_completed: bool,
    pub parent_file_id: Option<Uuid>,
}

/// Repository for managing file records
#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

impl FileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a file row
    #[tracing::instrument(
        skip(self, tx, new_file),
        fields(db.table = "files", db.operation = "insert")
    )]
    pub async fn insert_file(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_file: &NewFile,
    ) -> Result<File, PlatformError> {
        let encryption_meta = new_file
            .encryption_meta
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let file = sqlx::query_as::<Postgres, File>(
            r#"
            INSERT INTO files (
                workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            "#,
        )
        .bind(new_file.workspace_id)
        .bind(new_file.folder_id)
        .bind(&new_file.name)
        .bind(&new_file.storage_key)
        .bind(new_file.size)
        .bind(&new_file.content_type)
        .bind(encryption_meta)
        .bind(new_file.upload_completed)
        .bind(new_file.parent_file_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            file_id = %file.id,
            workspace_id = %file.workspace_id,
            size = file.size,
            upload_completed = file.upload_completed,
            "File inserted"
        );

        Ok(file)
    }

    /// Get file by ID (workspace-scoped)
    #[tracing::instrument(
        skip(self),
        fields(db.table = "files", db.operation = "select", db.record_id = %id)
    )]
    pub async fn get_file(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<File>, PlatformError> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(file)
    }

    /// Get file by ID inside a writer transaction
    pub async fn get_file_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<File>, PlatformError> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(file)
    }

    /// Flip `upload_completed` after the backend confirmed the multipart
    /// completion. Idempotent; returns None when the file is gone (deleted by
    /// a cascade while the completion job was in flight).
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "files", db.operation = "update", db.record_id = %file_id)
    )]
    pub async fn mark_upload_completed(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<File>, PlatformError> {
        let file = sqlx::query_as::<Postgres, File>(
            r#"
            UPDATE files
            SET upload_completed = TRUE, updated_at = NOW()
            WHERE workspace_id = $1 AND id = $2
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(file_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(file)
    }

    /// List files in a folder; None lists the workspace root
    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    pub async fn list_files(
        &self,
        workspace_id: Uuid,
        folder_id: Option<Uuid>,
    ) -> Result<Vec<File>, PlatformError> {
        let files = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1 AND folder_id IS NOT DISTINCT FROM $2
            ORDER BY name ASC
            "#,
        )
        .bind(workspace_id)
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(files)
    }

    /// List derived artifacts attached to a file
    #[tracing::instrument(skip(self), fields(db.table = "files", db.operation = "select"))]
    pub async fn list_derived_artifacts(
        &self,
        workspace_id: Uuid,
        parent_file_id: Uuid,
    ) -> Result<Vec<File>, PlatformError> {
        let files = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1 AND parent_file_id = $2
            ORDER BY name ASC
            "#,
        )
        .bind(workspace_id)
        .bind(parent_file_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(files)
    }

    /// Select every file whose folder is in the given set (cascade scoping)
    pub async fn select_files_in_folders(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<Vec<File>, PlatformError> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }

        let files = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1 AND folder_id = ANY($2)
            "#,
        )
        .bind(workspace_id)
        .bind(folder_ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(files)
    }

    /// Select every file in a workspace (workspace cascade)
    pub async fn select_all_workspace_files(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<Vec<File>, PlatformError> {
        let files = sqlx::query_as::<Postgres, File>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            FROM files
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(files)
    }

    /// Delete the derived artifacts of the given parents, returning the
    /// deleted rows so their storage objects can be cleaned up.
    #[tracing::instrument(skip(self, tx, parent_file_ids), fields(db.table = "files", db.operation = "delete"))]
    pub async fn delete_derived_artifacts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        parent_file_ids: &[Uuid],
    ) -> Result<Vec<File>, PlatformError> {
        if parent_file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let files = sqlx::query_as::<Postgres, File>(
            r#"
            DELETE FROM files
            WHERE workspace_id = $1 AND parent_file_id = ANY($2)
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(parent_file_ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(files)
    }

    /// Delete files by ID, returning the deleted rows
    #[tracing::instrument(skip(self, tx, ids), fields(db.table = "files", db.operation = "delete"))]
    pub async fn delete_files_by_ids(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<File>, PlatformError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let files = sqlx::query_as::<Postgres, File>(
            r#"
            DELETE FROM files
            WHERE workspace_id = $1 AND id = ANY($2)
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, upload_completed, parent_file_id, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(files)
    }

    /// Move files to another folder (None moves them to the workspace root)
    #[tracing::instrument(skip(self, tx, ids), fields(db.table = "files", db.operation = "update"))]
    pub async fn relink_files(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        ids: &[Uuid],
        dest_folder_id: Option<Uuid>,
    ) -> Result<u64, PlatformError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE files
            SET folder_id = $3, updated_at = NOW()
            WHERE workspace_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(workspace_id)
        .bind(ids)
        .bind(dest_folder_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
