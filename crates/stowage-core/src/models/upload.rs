use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::encryption::EncryptionMeta;

/// How the bytes of an upload reach storage.
///
/// DirectUpload and SingleChunkUpload both expect exactly one acknowledged
/// part and convert identically; they differ in how the client transfers the
/// bytes. MultiStepChunkUpload carries N parts against the backend's native
/// multipart protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum UploadAlgorithm {
    DirectUpload,
    SingleChunkUpload,
    MultiStepChunkUpload,
}

impl UploadAlgorithm {
    /// Whether conversion must schedule an explicit backend completion call.
    pub fn requires_multipart_completion(&self) -> bool {
        matches!(self, UploadAlgorithm::MultiStepChunkUpload)
    }
}

impl Display for UploadAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadAlgorithm::DirectUpload => write!(f, "direct_upload"),
            UploadAlgorithm::SingleChunkUpload => write!(f, "single_chunk_upload"),
            UploadAlgorithm::MultiStepChunkUpload => write!(f, "multi_step_chunk_upload"),
        }
    }
}

impl FromStr for UploadAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_upload" => Ok(UploadAlgorithm::DirectUpload),
            "single_chunk_upload" => Ok(UploadAlgorithm::SingleChunkUpload),
            "multi_step_chunk_upload" => Ok(UploadAlgorithm::MultiStepChunkUpload),
            _ => Err(anyhow::anyhow!("Invalid upload algorithm: {}", s)),
        }
    }
}

/// A file in flight: carries the future file's attributes plus the transfer
/// bookkeeping. Destroyed by conversion into a `File` or by abort/cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub folder_id: Option<Uuid>,
    pub name: String,
    pub storage_key: String,
    pub size: i64,
    pub content_type: String,
    pub encryption_meta: Option<EncryptionMeta>,
    pub algorithm: UploadAlgorithm,
    /// Part count the algorithm computed at creation; conversion requires
    /// exactly this many acknowledged parts.
    pub expected_parts: i32,
    pub part_size: i64,
    /// Backend multipart id for MultiStepChunkUpload, None otherwise.
    pub multipart_upload_id: Option<String>,
    pub owner_user_id: Uuid,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for FileUpload {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let encryption_meta = row
            .get::<Option<serde_json::Value>, _>("encryption_meta")
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse encryption_meta: {}", e).into())
            })?;
        Ok(FileUpload {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            folder_id: row.get("folder_id"),
            name: row.get("name"),
            storage_key: row.get("storage_key"),
            size: row.get("size"),
            content_type: row.get("content_type"),
            encryption_meta,
            algorithm: row.get::<String, _>("algorithm").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse algorithm: {}", e).into())
            })?,
            expected_parts: row.get("expected_parts"),
            part_size: row.get("part_size"),
            multipart_upload_id: row.get("multipart_upload_id"),
            owner_user_id: row.get("owner_user_id"),
            completed: row.get("completed"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// One acknowledged part of an upload. Unique per (upload_id, part_number);
/// re-acknowledging the same part is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FileUploadPart {
    pub upload_id: Uuid,
    pub part_number: i32,
    pub etag: String,
    pub created_at: DateTime<Utc>,
}

/// Request DTO for opening an upload slot
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUploadRequest {
    #[validate(length(
        min = 1,
        max = 255,
        message = "File name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Content type must be between 1 and 255 characters"
    ))]
    pub content_type: String,
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub size: u64,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_display_round_trip() {
        for algorithm in [
            UploadAlgorithm::DirectUpload,
            UploadAlgorithm::SingleChunkUpload,
            UploadAlgorithm::MultiStepChunkUpload,
        ] {
            assert_eq!(
                algorithm.to_string().parse::<UploadAlgorithm>().unwrap(),
                algorithm
            );
        }
        assert!("chunked".parse::<UploadAlgorithm>().is_err());
    }

    #[test]
    fn test_only_multi_step_requires_completion_call() {
        assert!(!UploadAlgorithm::DirectUpload.requires_multipart_completion());
        assert!(!UploadAlgorithm::SingleChunkUpload.requires_multipart_completion());
        assert!(UploadAlgorithm::MultiStepChunkUpload.requires_multipart_completion());
    }
}
