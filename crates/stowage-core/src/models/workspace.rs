use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

use crate::encryption::EncryptionMode;
use crate::storage_types::StorageBackend;

/// Workspace: the ownership root for files, folders, and uploads. Each
/// workspace maps to exactly one bucket on its storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub storage_backend: StorageBackend,
    pub bucket: String,
    pub encryption_mode: EncryptionMode,
    /// Aggregate size of completed files. Eventually consistent, recomputed
    /// by a debounced job.
    pub size_bytes: i64,
    pub owner_user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request DTO for creating a new workspace
#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkspaceRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "Workspace name must be between 1 and 255 characters"
    ))]
    pub name: String,
    pub owner_user_id: Uuid,
    pub storage_backend: StorageBackend,
    #[serde(default)]
    pub encryption_mode: EncryptionMode,
}
