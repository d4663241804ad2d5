use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::encryption::EncryptionMeta;
use stowage_core::models::{FileUpload, FileUploadPart, UploadAlgorithm};
use stowage_core::PlatformError;

/// Attributes for a new in-flight upload, produced by the upload planner.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub workspace_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub content_type: String,
    pub encryption_meta: Option<EncryptionMeta>,
    pub algorithm: UploadAlgorithm,
    pub expected_parts: i32,
    pub part_size: i64,
    pub multipart_upload_id: Option<String>,
    pub owner_user_id: Uuid,
}

/// Repository for in-flight uploads and their acknowledged parts
#[derive(Clone)]
pub struct UploadRepository {
    pool: PgPool,
}

impl UploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an upload row
    #[tracing::instrument(
        skip(self, tx, new_upload),
        fields(db.table = "file_uploads", db.operation = "insert")
    )]
    pub async fn create_upload(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_upload: &NewUpload,
    ) -> Result<FileUpload, PlatformError> {
        let encryption_meta = new_upload
            .encryption_meta
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let upload = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            INSERT INTO file_uploads (
                workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            "#,
        )
        .bind(new_upload.workspace_id)
        .bind(new_upload.folder_id)
        .bind(&new_upload.name)
        .bind(&new_upload.storage_key)
        .bind(new_upload.size)
        .bind(&new_upload.content_type)
        .bind(encryption_meta)
        .bind(new_upload.algorithm.to_string())
        .bind(new_upload.expected_parts)
        .bind(new_upload.part_size)
        .bind(new_upload.multipart_upload_id.as_deref())
        .bind(new_upload.owner_user_id)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            upload_id = %upload.id,
            workspace_id = %upload.workspace_id,
            algorithm = %upload.algorithm,
            expected_parts = upload.expected_parts,
            "Upload created"
        );

        Ok(upload)
    }

    /// Get upload by ID (workspace-scoped)
    #[tracing::instrument(
        skip(self),
        fields(db.table = "file_uploads", db.operation = "select", db.record_id = %id)
    )]
    pub async fn get_upload(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<FileUpload>, PlatformError> {
        let upload = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            FROM file_uploads
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(upload)
    }

    /// Get upload by ID inside a writer transaction
    pub async fn get_upload_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<FileUpload>, PlatformError> {
        let upload = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            FROM file_uploads
            WHERE workspace_id = $1 AND id = $2
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(upload)
    }

    /// Record one acknowledged part. Re-acknowledging the same part number is
    /// a no-op; returns whether a new row was inserted. Also refreshes the
    /// upload's `completed` flag and idle timestamp.
    #[tracing::instrument(
        skip(self, tx, etag),
        fields(db.table = "file_upload_parts", db.operation = "insert", db.record_id = %upload_id)
    )]
    pub async fn record_part(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        upload_id: Uuid,
        part_number: i32,
        etag: &str,
    ) -> Result<bool, PlatformError> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_upload_parts (upload_id, part_number, etag)
            VALUES ($1, $2, $3)
            ON CONFLICT (upload_id, part_number) DO NOTHING
            "#,
        )
        .bind(upload_id)
        .bind(part_number)
        .bind(etag)
        .execute(&mut **tx)
        .await?;

        let inserted = result.rows_affected() == 1;

        sqlx::query(
            r#"
            UPDATE file_uploads
            SET completed =
                    (SELECT COUNT(*) FROM file_upload_parts WHERE upload_id = $1) >= expected_parts,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(upload_id)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            upload_id = %upload_id,
            part_number = part_number,
            newly_recorded = inserted,
            "Upload part acknowledged"
        );

        Ok(inserted)
    }

    /// Acknowledged parts in part-number order
    pub async fn acknowledged_parts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        upload_id: Uuid,
    ) -> Result<Vec<FileUploadPart>, PlatformError> {
        let parts = sqlx::query_as::<Postgres, FileUploadPart>(
            r#"
            SELECT upload_id, part_number, etag, created_at
            FROM file_upload_parts
            WHERE upload_id = $1
            ORDER BY part_number ASC
            "#,
        )
        .bind(upload_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(parts)
    }

    /// Number of acknowledged parts
    pub async fn count_parts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        upload_id: Uuid,
    ) -> Result<i64, PlatformError> {
        let count = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM file_upload_parts WHERE upload_id = $1",
        )
        .bind(upload_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(count)
    }

    /// Acknowledged part numbers, read outside the writer. The copy job uses
    /// this to resume after a retry without re-transferring finished parts.
    pub async fn acknowledged_part_numbers(
        &self,
        upload_id: Uuid,
    ) -> Result<Vec<i32>, PlatformError> {
        let numbers = sqlx::query_scalar::<Postgres, i32>(
            r#"
            SELECT part_number FROM file_upload_parts
            WHERE upload_id = $1
            ORDER BY part_number ASC
            "#,
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers)
    }

    /// Delete one upload, returning the row. Part rows go with it via the
    /// foreign key cascade.
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "file_uploads", db.operation = "delete", db.record_id = %upload_id)
    )]
    pub async fn delete_upload(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        upload_id: Uuid,
    ) -> Result<Option<FileUpload>, PlatformError> {
        let upload = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            DELETE FROM file_uploads
            WHERE workspace_id = $1 AND id = $2
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(upload_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(upload)
    }

    /// Select every upload whose folder is in the given set (cascade scoping)
    pub async fn select_uploads_in_folders(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        folder_ids: &[Uuid],
    ) -> Result<Vec<FileUpload>, PlatformError> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }

        let uploads = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            FROM file_uploads
            WHERE workspace_id = $1 AND folder_id = ANY($2)
            "#,
        )
        .bind(workspace_id)
        .bind(folder_ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(uploads)
    }

    /// Select every upload in a workspace (workspace cascade)
    pub async fn select_all_workspace_uploads(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<Vec<FileUpload>, PlatformError> {
        let uploads = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            FROM file_uploads
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(uploads)
    }

    /// Delete uploads by ID, returning the deleted rows so the caller can
    /// abort backend multiparts and clean up staged objects.
    #[tracing::instrument(skip(self, tx, ids), fields(db.table = "file_uploads", db.operation = "delete"))]
    pub async fn delete_uploads_by_ids(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<FileUpload>, PlatformError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let uploads = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            DELETE FROM file_uploads
            WHERE workspace_id = $1 AND id = ANY($2)
            RETURNING
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(uploads)
    }

    /// Move uploads to another folder (None moves them to the workspace root)
    #[tracing::instrument(skip(self, tx, ids), fields(db.table = "file_uploads", db.operation = "update"))]
    pub async fn relink_uploads(
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
            UPDATE file_uploads
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

    /// Uploads idle since before the cutoff, oldest first. The expired-upload
    /// sweep reads this outside the writer and reaps through it.
    #[tracing::instrument(skip(self), fields(db.table = "file_uploads", db.operation = "select"))]
    pub async fn list_stale_uploads(
        &self,
        idle_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FileUpload>, PlatformError> {
        let uploads = sqlx::query_as::<Postgres, FileUpload>(
            r#"
            SELECT
                id, workspace_id, folder_id, name, storage_key, size, content_type,
                encryption_meta, algorithm, expected_parts, part_size,
                multipart_upload_id, owner_user_id, completed, created_at, updated_at
            FROM file_uploads
            WHERE updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(idle_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(uploads)
    }
}
