use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobPayload, JobType, RecomputeWorkspaceSizePayload};

/// Durable countdown for a multi-step operation. Steps are queue jobs tagged
/// with this saga's id; when `pending_steps` reaches zero the registered
/// terminal job is enqueued exactly once (`terminal_enqueued` guards the
/// transition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub terminal_job_type: JobType,
    pub terminal_payload: serde_json::Value,
    pub pending_steps: i32,
    pub terminal_enqueued: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Saga {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Saga {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            terminal_job_type: row
                .get::<String, _>("terminal_job_type")
                .parse()
                .map_err(|e| {
                    sqlx::Error::Decode(format!("Failed to parse terminal_job_type: {}", e).into())
                })?,
            terminal_payload: row.get("terminal_payload"),
            pending_steps: row.get("pending_steps"),
            terminal_enqueued: row.get("terminal_enqueued"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Saga {
    pub fn is_complete(&self) -> bool {
        self.pending_steps == 0
    }

    /// Debounce key the terminal enqueue should carry. A terminal size
    /// recompute may collapse into an equivalent undispatched job; that job
    /// runs after the final step's transaction commits and reads the same
    /// post-cascade catalog state.
    pub fn terminal_debounce_key(&self) -> Option<String> {
        match self.terminal_job_type {
            JobType::RecomputeWorkspaceSize => {
                serde_json::from_value::<RecomputeWorkspaceSizePayload>(
                    self.terminal_payload.clone(),
                )
                .ok()
                .and_then(|payload| payload.debounce_key())
            }
            _ => None,
        }
    }
}
