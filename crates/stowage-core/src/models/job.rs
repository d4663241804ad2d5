use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RecomputeWorkspaceSize,
    CompleteMultipartUpload,
    CopyFile,
    CleanupStoredObjects,
    DeleteBucket,
    SweepExpiredUploads,
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobType::RecomputeWorkspaceSize => write!(f, "recompute_workspace_size"),
            JobType::CompleteMultipartUpload => write!(f, "complete_multipart_upload"),
            JobType::CopyFile => write!(f, "copy_file"),
            JobType::CleanupStoredObjects => write!(f, "cleanup_stored_objects"),
            JobType::DeleteBucket => write!(f, "delete_bucket"),
            JobType::SweepExpiredUploads => write!(f, "sweep_expired_uploads"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recompute_workspace_size" => Ok(JobType::RecomputeWorkspaceSize),
            "complete_multipart_upload" => Ok(JobType::CompleteMultipartUpload),
            "copy_file" => Ok(JobType::CopyFile),
            "cleanup_stored_objects" => Ok(JobType::CleanupStoredObjects),
            "delete_bucket" => Ok(JobType::DeleteBucket),
            "sweep_expired_uploads" => Ok(JobType::SweepExpiredUploads),
            _ => Err(anyhow::anyhow!("Invalid job type: {}", s)),
        }
    }
}

/// The three executor shapes a job handler can take. Catalog-only handlers
/// run a single writer transaction; catalog-plus-effect handlers additionally
/// run a side effect after commit; long-running handlers do network I/O
/// without holding the writer and record completion in a short transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    CatalogOnly,
    CatalogPlusEffect,
    LongRunning,
}

impl JobType {
    pub fn executor_kind(&self) -> ExecutorKind {
        match self {
            JobType::RecomputeWorkspaceSize => ExecutorKind::CatalogOnly,
            JobType::SweepExpiredUploads => ExecutorKind::CatalogPlusEffect,
            JobType::CompleteMultipartUpload
            | JobType::CopyFile
            | JobType::CleanupStoredObjects
            | JobType::DeleteBucket => ExecutorKind::LongRunning,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "job_status", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Scheduled,
    Cancelled,
    Blocked,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "scheduled" => Ok(JobStatus::Scheduled),
            "cancelled" => Ok(JobStatus::Cancelled),
            "blocked" => Ok(JobStatus::Blocked),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
    Critical = 10,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0..=3 => Priority::Low,
            4..=6 => Priority::Normal,
            7..=9 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

/// Durable unit of work owned by the job engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    /// Collapses repeated enqueues: while a pending job carries this key,
    /// enqueuing another job with the same key is a no-op.
    pub debounce_key: Option<String>,
    /// Links this job to a completion chain; finishing it decrements the
    /// saga's outstanding step count.
    pub saga_id: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for QueueJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(QueueJob {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            job_type: row.get::<String, _>("job_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job_type: {}", e).into())
            })?,
            status: row.get("status"),
            priority: row.get("priority"),
            payload: row.get("payload"),
            result: row.get("result"),
            debounce_key: row.get("debounce_key"),
            saga_id: row.get("saga_id"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            timeout_seconds: row.get("timeout_seconds"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl QueueJob {
    /// Whether a worker may claim this job now. Blocked jobs become eligible
    /// again once their reschedule delay elapses.
    pub fn is_ready_to_run(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Blocked
        ) && self.scheduled_at <= Utc::now()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn should_timeout(&self, started_at: DateTime<Utc>) -> bool {
        if let Some(timeout) = self.timeout_seconds {
            let elapsed = Utc::now().signed_duration_since(started_at);
            elapsed.num_seconds() >= timeout as i64
        } else {
            false
        }
    }

    /// Extract the payload as a typed struct.
    /// Returns None if deserialization fails.
    pub fn payload_as<P: JobPayload>(&self) -> Option<P> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: JobPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Extract the result as a typed struct.
    /// Returns None if result is not set or deserialization fails.
    pub fn result_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Create a new payload from a typed struct.
    /// Use this when enqueuing jobs to ensure type consistency.
    pub fn payload_from<P: JobPayload>(payload: &P) -> serde_json::Value {
        serde_json::to_value(payload).unwrap_or_default()
    }
}

/// Trait for type-safe job payloads
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn job_type() -> JobType;

    /// Debounce key for this payload, if the job type collapses bursts.
    fn debounce_key(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecomputeWorkspaceSizePayload {
    pub workspace_id: Uuid,
}

impl JobPayload for RecomputeWorkspaceSizePayload {
    fn job_type() -> JobType {
        JobType::RecomputeWorkspaceSize
    }

    fn debounce_key(&self) -> Option<String> {
        Some(format!("recompute_workspace_size:{}", self.workspace_id))
    }
}

/// One completed part reported to the backend on multipart completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPartRecord {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteMultipartUploadPayload {
    pub file_id: Uuid,
    pub workspace_id: Uuid,
    pub bucket: String,
    pub storage_key: String,
    pub multipart_upload_id: String,
    pub parts: Vec<CompletedPartRecord>,
}

impl JobPayload for CompleteMultipartUploadPayload {
    fn job_type() -> JobType {
        JobType::CompleteMultipartUpload
    }
}

/// What to do with the new file once the copied bytes land.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyCompletionAction {
    /// Convert the target upload into an ordinary file.
    FinalizeAsFile,
    /// Convert the target upload into a derived artifact of `parent_file_id`.
    FinalizeAsAttachment { parent_file_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyFilePayload {
    pub source_file_id: Uuid,
    pub target_upload_id: Uuid,
    pub workspace_id: Uuid,
    pub on_complete: CopyCompletionAction,
}

impl JobPayload for CopyFilePayload {
    fn job_type() -> JobType {
        JobType::CopyFile
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStoredObjectsPayload {
    pub workspace_id: Uuid,
    pub bucket: String,
    pub storage_keys: Vec<String>,
}

impl JobPayload for CleanupStoredObjectsPayload {
    fn job_type() -> JobType {
        JobType::CleanupStoredObjects
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBucketPayload {
    pub workspace_id: Uuid,
    pub bucket: String,
}

impl JobPayload for DeleteBucketPayload {
    fn job_type() -> JobType {
        JobType::DeleteBucket
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepExpiredUploadsPayload {
    /// Uploads idle longer than this are considered abandoned.
    pub max_age_hours: i64,
}

impl JobPayload for SweepExpiredUploadsPayload {
    fn job_type() -> JobType {
        JobType::SweepExpiredUploads
    }

    fn debounce_key(&self) -> Option<String> {
        Some("sweep_expired_uploads".to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub scheduled: i64,
    pub cancelled: i64,
    pub blocked: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(status: JobStatus, scheduled_at: DateTime<Utc>) -> QueueJob {
        QueueJob {
            id: Uuid::new_v4(),
            workspace_id: Some(Uuid::new_v4()),
            job_type: JobType::RecomputeWorkspaceSize,
            status,
            priority: Priority::Normal.as_i32(),
            payload: serde_json::json!({}),
            result: None,
            debounce_key: None,
            saga_id: None,
            scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout_seconds: Some(3600),
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_type_display_round_trip() {
        for job_type in [
            JobType::RecomputeWorkspaceSize,
            JobType::CompleteMultipartUpload,
            JobType::CopyFile,
            JobType::CleanupStoredObjects,
            JobType::DeleteBucket,
            JobType::SweepExpiredUploads,
        ] {
            assert_eq!(job_type.to_string().parse::<JobType>().unwrap(), job_type);
        }
        assert!("invalid_type".parse::<JobType>().is_err());
    }

    #[test]
    fn test_job_status_from_str() {
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert_eq!("blocked".parse::<JobStatus>().unwrap(), JobStatus::Blocked);
        assert!("invalid_status".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_executor_kinds_are_closed_over_job_types() {
        assert_eq!(
            JobType::RecomputeWorkspaceSize.executor_kind(),
            ExecutorKind::CatalogOnly
        );
        assert_eq!(
            JobType::SweepExpiredUploads.executor_kind(),
            ExecutorKind::CatalogPlusEffect
        );
        assert_eq!(JobType::CopyFile.executor_kind(), ExecutorKind::LongRunning);
        assert_eq!(
            JobType::DeleteBucket.executor_kind(),
            ExecutorKind::LongRunning
        );
    }

    #[test]
    fn test_priority_as_i32() {
        assert_eq!(Priority::Low.as_i32(), 3);
        assert_eq!(Priority::Normal.as_i32(), 5);
        assert_eq!(Priority::High.as_i32(), 7);
        assert_eq!(Priority::Critical.as_i32(), 10);
    }

    #[test]
    fn test_priority_from_i32() {
        assert_eq!(Priority::from_i32(0), Priority::Low);
        assert_eq!(Priority::from_i32(5), Priority::Normal);
        assert_eq!(Priority::from_i32(9), Priority::High);
        assert_eq!(Priority::from_i32(100), Priority::Critical);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_job_is_ready_to_run_with_pending_status() {
        let job = make_job(JobStatus::Pending, Utc::now() - chrono::Duration::seconds(10));
        assert!(job.is_ready_to_run());
    }

    #[test]
    fn test_job_is_ready_to_run_with_scheduled_status() {
        let job = make_job(
            JobStatus::Scheduled,
            Utc::now() - chrono::Duration::seconds(5),
        );
        assert!(job.is_ready_to_run());
    }

    #[test]
    fn test_job_is_not_ready_when_scheduled_in_future() {
        let job = make_job(
            JobStatus::Scheduled,
            Utc::now() + chrono::Duration::seconds(3600),
        );
        assert!(!job.is_ready_to_run());
    }

    #[test]
    fn test_job_is_not_ready_when_running() {
        let job = make_job(JobStatus::Running, Utc::now() - chrono::Duration::seconds(10));
        assert!(!job.is_ready_to_run());
    }

    #[test]
    fn test_blocked_job_becomes_ready_after_delay() {
        let parked = make_job(
            JobStatus::Blocked,
            Utc::now() + chrono::Duration::seconds(60),
        );
        assert!(!parked.is_ready_to_run());

        let elapsed = make_job(JobStatus::Blocked, Utc::now() - chrono::Duration::seconds(1));
        assert!(elapsed.is_ready_to_run());
    }

    #[test]
    fn test_job_can_retry_under_limit() {
        let mut job = make_job(JobStatus::Failed, Utc::now());
        job.retry_count = 2;
        assert!(job.can_retry());
        job.retry_count = 3;
        assert!(!job.can_retry());
        job.retry_count = 5;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_job_should_timeout_when_exceeded() {
        let mut job = make_job(JobStatus::Running, Utc::now());
        job.timeout_seconds = Some(60);
        assert!(job.should_timeout(Utc::now() - chrono::Duration::seconds(120)));
        assert!(job.should_timeout(Utc::now() - chrono::Duration::seconds(60)));
        assert!(!job.should_timeout(Utc::now() - chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_job_should_not_timeout_when_no_timeout_set() {
        let mut job = make_job(JobStatus::Running, Utc::now());
        job.timeout_seconds = None;
        assert!(!job.should_timeout(Utc::now() - chrono::Duration::days(365)));
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = CopyFilePayload {
            source_file_id: Uuid::new_v4(),
            target_upload_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            on_complete: CopyCompletionAction::FinalizeAsAttachment {
                parent_file_id: Uuid::new_v4(),
            },
        };
        let mut job = make_job(JobStatus::Pending, Utc::now());
        job.job_type = JobType::CopyFile;
        job.payload = QueueJob::payload_from(&payload);

        let parsed: CopyFilePayload = job.try_payload_as().unwrap();
        assert_eq!(parsed.source_file_id, payload.source_file_id);
        assert_eq!(parsed.on_complete, payload.on_complete);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let mut job = make_job(JobStatus::Pending, Utc::now());
        job.job_type = JobType::CopyFile;
        job.payload = serde_json::json!({"unexpected": true});
        assert!(job.try_payload_as::<CopyFilePayload>().is_err());
        assert!(job.payload_as::<CopyFilePayload>().is_none());
    }

    #[test]
    fn test_debounce_key_is_stable_per_workspace() {
        let workspace_id = Uuid::new_v4();
        let a = RecomputeWorkspaceSizePayload { workspace_id };
        let b = RecomputeWorkspaceSizePayload { workspace_id };
        assert_eq!(a.debounce_key(), b.debounce_key());
        assert!(a.debounce_key().unwrap().contains(&workspace_id.to_string()));

        let other = RecomputeWorkspaceSizePayload {
            workspace_id: Uuid::new_v4(),
        };
        assert_ne!(a.debounce_key(), other.debounce_key());
    }
}
