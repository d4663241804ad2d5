use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::encryption::EncryptionMode;
use stowage_core::models::Workspace;
use stowage_core::{PlatformError, StorageBackend};

/// Repository for managing workspaces
#[derive(Clone)]
pub struct WorkspaceRepository {
    pool: PgPool,
}

impl WorkspaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new workspace row. The caller mints the id because the bucket
    /// name embeds it; bucket provisioning on the storage backend happens
    /// outside this call, the row only records which bucket was assigned.
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "workspaces", db.operation = "insert")
    )]
    pub async fn create_workspace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        name: &str,
        owner_user_id: Uuid,
        storage_backend: StorageBackend,
        bucket: &str,
        encryption_mode: EncryptionMode,
    ) -> Result<Workspace, PlatformError> {
        let workspace = sqlx::query_as::<Postgres, Workspace>(
            r#"
            INSERT INTO workspaces (id, name, owner_user_id, storage_backend, bucket, encryption_mode)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING
                id, name, storage_backend, bucket, encryption_mode,
                size_bytes, owner_user_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(owner_user_id)
        .bind(storage_backend)
        .bind(bucket)
        .bind(encryption_mode)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            workspace_id = %workspace.id,
            storage_backend = %storage_backend,
            encryption_mode = %encryption_mode,
            "Workspace created"
        );

        Ok(workspace)
    }

    /// Get workspace by ID
    #[tracing::instrument(
        skip(self),
        fields(db.table = "workspaces", db.operation = "select", db.record_id = %id)
    )]
    pub async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>, PlatformError> {
        let workspace = sqlx::query_as::<Postgres, Workspace>(
            r#"
            SELECT
                id, name, storage_backend, bucket, encryption_mode,
                size_bytes, owner_user_id, created_at, updated_at
            FROM workspaces
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(workspace)
    }

    /// Get workspace by ID inside a writer transaction
    pub async fn get_workspace_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Workspace>, PlatformError> {
        let workspace = sqlx::query_as::<Postgres, Workspace>(
            r#"
            SELECT
                id, name, storage_backend, bucket, encryption_mode,
                size_bytes, owner_user_id, created_at, updated_at
            FROM workspaces
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(workspace)
    }

    /// List workspaces owned by a user
    #[tracing::instrument(skip(self), fields(db.table = "workspaces", db.operation = "select"))]
    pub async fn list_workspaces(
        &self,
        owner_user_id: Uuid,
    ) -> Result<Vec<Workspace>, PlatformError> {
        let workspaces = sqlx::query_as::<Postgres, Workspace>(
            r#"
            SELECT
                id, name, storage_backend, bucket, encryption_mode,
                size_bytes, owner_user_id, created_at, updated_at
            FROM workspaces
            WHERE owner_user_id = $1
            ORDER BY name ASC
            "#,
        )
        .bind(owner_user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(workspaces)
    }

    /// Recompute `size_bytes` from completed files in one statement.
    ///
    /// The aggregate is eventually consistent: uploads and deletes enqueue a
    /// debounced recompute job instead of adjusting the counter inline.
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "workspaces", db.operation = "update", db.record_id = %workspace_id)
    )]
    pub async fn recompute_size(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<i64, PlatformError> {
        let size_bytes = sqlx::query_scalar::<Postgres, i64>(
            r#"
            UPDATE workspaces
            SET size_bytes = COALESCE(
                    (SELECT SUM(size) FROM files WHERE workspace_id = $1 AND upload_completed),
                    0
                ),
                updated_at = NOW()
            WHERE id = $1
            RETURNING size_bytes
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| PlatformError::NotFound("Workspace not found".to_string()))?;

        tracing::debug!(
            workspace_id = %workspace_id,
            size_bytes = size_bytes,
            "Workspace size recomputed"
        );

        Ok(size_bytes)
    }

    /// Delete the workspace row, returning it so the caller can tear down the
    /// bucket. Child rows must already be gone (the cascade orchestrator
    /// deletes them in the same transaction).
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "workspaces", db.operation = "delete", db.record_id = %workspace_id)
    )]
    pub async fn delete_workspace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<Option<Workspace>, PlatformError> {
        let workspace = sqlx::query_as::<Postgres, Workspace>(
            r#"
            DELETE FROM workspaces
            WHERE id = $1
            RETURNING
                id, name, storage_backend, bucket, encryption_mode,
                size_bytes, owner_user_id, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .fetch_optional(&mut **tx)
        .await?;

        if workspace.is_some() {
            tracing::info!(workspace_id = %workspace_id, "Workspace deleted");
        }

        Ok(workspace)
    }
}
