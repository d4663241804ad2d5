use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encryption::EncryptionMeta;

/// Durable file record. Size and storage key are immutable once
/// `upload_completed` is set; `encryption_meta` is None for plaintext files.
/// `parent_file_id` links derived artifacts (e.g. attachments produced by a
/// copy job) to the file they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub content_type: String,
    pub encryption_meta: Option<EncryptionMeta>,
    pub upload_completed: bool,
    pub parent_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for File {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let encryption_meta = row
            .get::<Option<serde_json::Value>, _>("encryption_meta")
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse encryption_meta: {}", e).into())
            })?;
        Ok(File {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            folder_id: row.get("folder_id"),
            name: row.get("name"),
            storage_key: row.get("storage_key"),
            size: row.get("size"),
            content_type: row.get("content_type"),
            encryption_meta,
            upload_completed: row.get("upload_completed"),
            parent_file_id: row.get("parent_file_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl File {
    pub fn is_encrypted(&self) -> bool {
        self.encryption_meta.is_some()
    }
}
