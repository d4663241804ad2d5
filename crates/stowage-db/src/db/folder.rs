use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::models::Folder;
use stowage_core::PlatformError;

/// Repository for managing folders and their ancestor-path index.
///
/// Every folder row carries `ancestor_folder_ids`, the ordered chain of
/// ancestor ids from root to immediate parent. Subtree membership and
/// bulk selection are single array-operator queries against a GIN index;
/// no recursive CTEs.
#[derive(Clone)]
pub struct FolderRepository {
    pool: PgPool,
}

impl FolderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new folder, deriving its ancestor path from the parent
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "folders", db.operation = "insert")
    )]
    pub async fn create_folder(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Folder, PlatformError> {
        let ancestor_path = match parent_id {
            Some(pid) => {
                let parent = self
                    .get_folder_in_tx(tx, workspace_id, pid)
                    .await?
                    .ok_or_else(|| PlatformError::NotFound("Parent folder not found".to_string()))?;
                parent.child_ancestor_path()
            }
            None => Vec::new(),
        };

        // Check for duplicate name in same parent
        let duplicate_exists = sqlx::query_scalar::<Postgres, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM folders
                WHERE workspace_id = $1
                    AND parent_id IS NOT DISTINCT FROM $2
                    AND name = $3
                    AND NOT deleted
            )
            "#,
        )
        .bind(workspace_id)
        .bind(parent_id)
        .bind(name)
        .fetch_one(&mut **tx)
        .await?;

        if duplicate_exists {
            return Err(PlatformError::InvalidInput(
                "Duplicate folder name in same parent".to_string(),
            ));
        }

        let folder = sqlx::query_as::<Postgres, Folder>(
            r#"
            INSERT INTO folders (workspace_id, name, parent_id, ancestor_folder_ids)
            VALUES ($1, $2, $3, $4)
            RETURNING
                id, workspace_id, name, parent_id, ancestor_folder_ids,
                deleted, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(name)
        .bind(parent_id)
        .bind(&ancestor_path)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            folder_id = %folder.id,
            workspace_id = %workspace_id,
            depth = folder.depth(),
            "Folder created"
        );

        Ok(folder)
    }

    /// Get folder by ID (workspace-scoped, excludes soft-deleted)
    #[tracing::instrument(
        skip(self),
        fields(db.table = "folders", db.operation = "select", db.record_id = %id)
    )]
    pub async fn get_folder(
        &self,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Folder>, PlatformError> {
        let folder = sqlx::query_as::<Postgres, Folder>(
            r#"
            SELECT
                id, workspace_id, name, parent_id, ancestor_folder_ids,
                deleted, created_at, updated_at
            FROM folders
            WHERE workspace_id = $1 AND id = $2 AND NOT deleted
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(folder)
    }

    /// Get folder by ID inside a writer transaction
    pub async fn get_folder_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Folder>, PlatformError> {
        let folder = sqlx::query_as::<Postgres, Folder>(
            r#"
            SELECT
                id, workspace_id, name, parent_id, ancestor_folder_ids,
                deleted, created_at, updated_at
            FROM folders
            WHERE workspace_id = $1 AND id = $2 AND NOT deleted
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(folder)
    }

    /// List folders, optionally filtered by parent
    #[tracing::instrument(skip(self), fields(db.table = "folders", db.operation = "select"))]
    pub async fn list_folders(
        &self,
        workspace_id: Uuid,
        parent_id: Option<Option<Uuid>>, // Option<Option> to distinguish None from Some(None)
    ) -> Result<Vec<Folder>, PlatformError> {
        let folders = match parent_id {
            None => {
                // Return all folders for the workspace
                sqlx::query_as::<Postgres, Folder>(
                    r#"
                    SELECT
                        id, workspace_id, name, parent_id, ancestor_folder_ids,
                        deleted, created_at, updated_at
                    FROM folders
                    WHERE workspace_id = $1 AND NOT deleted
                    ORDER BY name ASC
                    "#,
                )
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await?
            }
            Some(None) => {
                // Return only root folders (parent_id IS NULL)
                sqlx::query_as::<Postgres, Folder>(
                    r#"
                    SELECT
                        id, workspace_id, name, parent_id, ancestor_folder_ids,
                        deleted, created_at, updated_at
                    FROM folders
                    WHERE workspace_id = $1 AND parent_id IS NULL AND NOT deleted
                    ORDER BY name ASC
                    "#,
                )
                .bind(workspace_id)
                .fetch_all(&self.pool)
                .await?
            }
            Some(Some(pid)) => {
                // Return folders with specific parent
                sqlx::query_as::<Postgres, Folder>(
                    r#"
                    SELECT
                        id, workspace_id, name, parent_id, ancestor_folder_ids,
                        deleted, created_at, updated_at
                    FROM folders
                    WHERE workspace_id = $1 AND parent_id = $2 AND NOT deleted
                    ORDER BY name ASC
                    "#,
                )
                .bind(workspace_id)
                .bind(pid)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(folders)
    }

    /// Resolve the given roots plus every folder inside their subtrees to a
    /// flat id set, via the ancestor index.
    ///
    /// Soft-deleted folders are included so a repeated cascade over the same
    /// subtree converges instead of missing tombstoned branches.
    #[tracing::instrument(skip(self, tx, roots), fields(db.table = "folders", db.operation = "select"))]
    pub async fn descendant_folder_ids(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        roots: &[Uuid],
    ) -> Result<Vec<Uuid>, PlatformError> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let ids = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id FROM folders
            WHERE workspace_id = $1
                AND (id = ANY($2) OR ancestor_folder_ids && $2)
            "#,
        )
        .bind(workspace_id)
        .bind(roots)
        .fetch_all(&mut **tx)
        .await?;

        Ok(ids)
    }

    /// Re-point a subtree root at a new parent (or the workspace root).
    /// Path rewriting for the subtree is a separate step.
    pub async fn relink_folder(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        folder_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<bool, PlatformError> {
        let result = sqlx::query(
            r#"
            UPDATE folders
            SET parent_id = $3, updated_at = NOW()
            WHERE workspace_id = $1 AND id = $2 AND NOT deleted
            "#,
        )
        .bind(workspace_id)
        .bind(folder_id)
        .bind(new_parent_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Rewrite the ancestor path of a whole subtree in one statement.
    ///
    /// Each folder's new path is the destination path followed by the suffix
    /// of its own path below the subtree root (`root_depth` is the root's
    /// depth before the move). The root itself ends up with exactly the
    /// destination path.
    #[tracing::instrument(
        skip(self, tx, destination_path),
        fields(db.table = "folders", db.operation = "update", db.record_id = %root_id)
    )]
    pub async fn rewrite_subtree_paths(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        root_id: Uuid,
        root_depth: i32,
        destination_path: &[Uuid],
    ) -> Result<u64, PlatformError> {
        let result = sqlx::query(
            r#"
            UPDATE folders
            SET ancestor_folder_ids =
                    $4::uuid[] || ancestor_folder_ids[($3 + 1):cardinality(ancestor_folder_ids)],
                updated_at = NOW()
            WHERE workspace_id = $1
                AND (id = $2 OR ancestor_folder_ids @> ARRAY[$2]::uuid[])
            "#,
        )
        .bind(workspace_id)
        .bind(root_id)
        .bind(root_depth)
        .bind(destination_path)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            root_id = %root_id,
            rewritten = result.rows_affected(),
            "Subtree ancestor paths rewritten"
        );

        Ok(result.rows_affected())
    }

    /// Whether any folder in the workspace lists its own id among its
    /// ancestors. Run after a subtree rewrite; a hit means the move created a
    /// cycle and the transaction must roll back.
    pub async fn any_folder_inside_itself(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<bool, PlatformError> {
        let corrupted = sqlx::query_scalar::<Postgres, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM folders
                WHERE workspace_id = $1 AND id = ANY(ancestor_folder_ids)
            )
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(corrupted)
    }

    /// Mark folders deleted. Rows stay behind as tombstones so the ancestor
    /// index of surviving siblings is untouched; returns how many rows
    /// flipped.
    #[tracing::instrument(skip(self, tx, ids), fields(db.table = "folders", db.operation = "update"))]
    pub async fn soft_delete_folders(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        ids: &[Uuid],
    ) -> Result<u64, PlatformError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE folders
            SET deleted = TRUE, updated_at = NOW()
            WHERE workspace_id = $1 AND id = ANY($2) AND NOT deleted
            "#,
        )
        .bind(workspace_id)
        .bind(ids)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Hard-delete every folder row in a workspace, tombstones included.
    /// Only the workspace cascade calls this, after files and uploads are
    /// already gone.
    #[tracing::instrument(skip(self, tx), fields(db.table = "folders", db.operation = "delete"))]
    pub async fn delete_all_workspace_folders(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<u64, PlatformError> {
        let result = sqlx::query("DELETE FROM folders WHERE workspace_id = $1")
            .bind(workspace_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }
}
