use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::config::QUEUE_MAX_RETRIES;
use stowage_core::models::{JobPayload, JobStats, JobStatus, JobType, Priority, QueueJob};
use stowage_core::PlatformError;

/// Attributes for a job being enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub workspace_id: Option<Uuid>,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub debounce_key: Option<String>,
    pub saga_id: Option<Uuid>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
    pub timeout_seconds: Option<i32>,
}

impl NewJob {
    /// Build a job from a typed payload, inheriting the payload's job type
    /// and debounce key.
    pub fn from_payload<P: JobPayload>(workspace_id: Option<Uuid>, payload: &P) -> Self {
        Self {
            workspace_id,
            job_type: P::job_type(),
            payload: QueueJob::payload_from(payload),
            priority: Priority::default(),
            debounce_key: payload.debounce_key(),
            saga_id: None,
            scheduled_at: None,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_saga(mut self, saga_id: Uuid) -> Self {
        self.saga_id = Some(saga_id);
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i32) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// Repository for the durable job queue
#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job inside the surrounding catalog transaction.
    ///
    /// Returns None when the job carries a debounce key and an undispatched
    /// job with the same key is already queued; the partial unique index on
    /// pending debounce keys makes the collapse atomic. Workers are notified
    /// through `pg_notify` so they wake without waiting for the poll interval.
    #[tracing::instrument(skip(self, tx, new_job), fields(job_type = %new_job.job_type))]
    pub async fn enqueue_job(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new_job: NewJob,
    ) -> Result<Option<QueueJob>, PlatformError> {
        let scheduled_at = new_job.scheduled_at.unwrap_or_else(Utc::now);
        let max_retries = new_job.max_retries.unwrap_or(QUEUE_MAX_RETRIES);
        let status = if scheduled_at > Utc::now() {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };

        let job: Option<QueueJob> = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            INSERT INTO queue_jobs (
                workspace_id, job_type, status, priority, payload, debounce_key,
                saga_id, scheduled_at, max_retries, timeout_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (debounce_key)
                WHERE status IN ('pending', 'scheduled', 'blocked')
                DO NOTHING
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(new_job.workspace_id)
        .bind(new_job.job_type.to_string())
        .bind(status)
        .bind(new_job.priority.as_i32())
        .bind(&new_job.payload)
        .bind(new_job.debounce_key.as_deref())
        .bind(new_job.saga_id)
        .bind(scheduled_at)
        .bind(max_retries)
        .bind(new_job.timeout_seconds)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(job) = job else {
            tracing::debug!(
                job_type = %new_job.job_type,
                debounce_key = ?new_job.debounce_key,
                "Job enqueue collapsed into an already-queued duplicate"
            );
            return Ok(None);
        };

        // Notify workers so they can wake immediately instead of waiting for
        // the poll interval. Non-fatal: workers discover jobs by polling if
        // LISTEN/NOTIFY is unavailable.
        if let Err(e) = sqlx::query("SELECT pg_notify('stowage_new_job', '')")
            .execute(&mut **tx)
            .await
        {
            tracing::warn!(
                error = %e,
                job_id = %job.id,
                "Failed to send pg_notify for new job, workers will discover it via polling"
            );
        }

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            saga_id = ?job.saga_id,
            "Job enqueued"
        );

        Ok(Some(job))
    }

    /// Get a job by ID (system method, used by workers and tests)
    #[tracing::instrument(skip(self))]
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<QueueJob>, PlatformError> {
        let job = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            SELECT
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            FROM queue_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// List a workspace's jobs, newest first, optionally filtered by status
    #[tracing::instrument(skip(self))]
    pub async fn list_jobs(
        &self,
        workspace_id: Uuid,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueJob>, PlatformError> {
        let limit = limit.min(1000);

        let jobs = match status {
            Some(status) => {
                sqlx::query_as::<Postgres, QueueJob>(
                    r#"
                    SELECT
                        id, workspace_id, job_type, status, priority, payload, result,
                        debounce_key, saga_id, scheduled_at, started_at, completed_at,
                        retry_count, max_retries, timeout_seconds, last_error,
                        created_at, updated_at
                    FROM queue_jobs
                    WHERE workspace_id = $1 AND status = $2
                    ORDER BY created_at DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(workspace_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<Postgres, QueueJob>(
                    r#"
                    SELECT
                        id, workspace_id, job_type, status, priority, payload, result,
                        debounce_key, saga_id, scheduled_at, started_at, completed_at,
                        retry_count, max_retries, timeout_seconds, last_error,
                        created_at, updated_at
                    FROM queue_jobs
                    WHERE workspace_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(workspace_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(jobs)
    }

    /// Atomically claim the next available job (used by workers).
    ///
    /// Jobs are claimed across all workspaces in priority order; blocked jobs
    /// become eligible again once their reschedule delay elapses. Uses
    /// FOR UPDATE SKIP LOCKED so concurrent workers never double-claim.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next_job(&self) -> Result<Option<QueueJob>, PlatformError> {
        let mut tx = self.pool.begin().await?;

        let job: Option<QueueJob> = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            SELECT
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            FROM queue_jobs
            WHERE status IN ('pending', 'scheduled', 'blocked')
                AND scheduled_at <= NOW()
            ORDER BY priority DESC, scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(job) = job {
            let claimed: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
                r#"
                UPDATE queue_jobs
                SET status = 'running',
                    started_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING
                    id, workspace_id, job_type, status, priority, payload, result,
                    debounce_key, saga_id, scheduled_at, started_at, completed_at,
                    retry_count, max_retries, timeout_seconds, last_error,
                    created_at, updated_at
                "#,
            )
            .bind(job.id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::debug!(
                job_id = %claimed.id,
                job_type = %claimed.job_type,
                retry_count = claimed.retry_count,
                "Job claimed"
            );

            Ok(Some(claimed))
        } else {
            tx.rollback().await.ok();
            Ok(None)
        }
    }

    /// Update job status (system method)
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(job_id = %job_id, status = %status, "Job status updated");

        Ok(job)
    }

    /// Mark job as completed with its result (system method)
    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(
        &self,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(result)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            job_id = %job_id,
            job_type = %job.job_type,
            "Job completed"
        );

        Ok(job)
    }

    /// Transactional variant of `mark_completed`, for callers that must couple
    /// the terminal write with other statements (saga step accounting).
    pub async fn mark_completed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        result: serde_json::Value,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(result)
        .fetch_one(&mut **tx)
        .await?;

        tracing::info!(
            job_id = %job_id,
            job_type = %job.job_type,
            "Job completed"
        );

        Ok(job)
    }

    /// Mark job as failed with error details (system method)
    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        error: serde_json::Value,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'failed',
                result = $2,
                last_error = $2->>'error',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        tracing::error!(
            job_id = %job_id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            "Job failed"
        );

        Ok(job)
    }

    /// Transactional variant of `mark_failed`.
    pub async fn mark_failed_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        error: serde_json::Value,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'failed',
                result = $2,
                last_error = $2->>'error',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(error)
        .fetch_one(&mut **tx)
        .await?;

        tracing::error!(
            job_id = %job_id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            "Job failed"
        );

        Ok(job)
    }

    /// Park a job whose precondition is unavailable: reschedule it after the
    /// given delay without touching the retry count. Being blocked is not a
    /// failure.
    #[tracing::instrument(skip(self))]
    pub async fn mark_blocked(
        &self,
        job_id: Uuid,
        reason: &str,
        requeue_delay_secs: i64,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'blocked',
                scheduled_at = NOW() + ($3 * interval '1 second'),
                started_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .bind(requeue_delay_secs)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            job_id = %job_id,
            job_type = %job.job_type,
            reason = reason,
            requeue_delay_secs = requeue_delay_secs,
            "Job blocked, rescheduled"
        );

        Ok(job)
    }

    /// Increment retry count and reschedule after the backoff (system method)
    #[tracing::instrument(skip(self))]
    pub async fn increment_retry(
        &self,
        job_id: Uuid,
        backoff_seconds: i64,
        error_message: &str,
    ) -> Result<QueueJob, PlatformError> {
        let job: QueueJob = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                started_at = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(backoff_seconds)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            job_id = %job_id,
            retry_count = job.retry_count,
            max_retries = job.max_retries,
            backoff_seconds = backoff_seconds,
            "Job retry scheduled"
        );

        Ok(job)
    }

    /// Requeue running jobs whose worker disappeared: anything running past
    /// its timeout plus the grace period is either rescheduled (retries left)
    /// or failed (retries exhausted). Returns how many rows were touched.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale_running_jobs(
        &self,
        grace_period_secs: i64,
    ) -> Result<u64, PlatformError> {
        let requeued: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            WITH requeued AS (
                UPDATE queue_jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    started_at = NULL,
                    last_error = 'reaped: job exceeded its timeout grace period',
                    updated_at = NOW()
                WHERE status = 'running'
                    AND started_at < NOW()
                        - ((COALESCE(timeout_seconds, 3600) + $1) * interval '1 second')
                    AND retry_count < max_retries
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM requeued
            "#,
        )
        .bind(grace_period_secs)
        .fetch_one(&self.pool)
        .await?;

        let failed: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            WITH failed AS (
                UPDATE queue_jobs
                SET status = 'failed',
                    completed_at = NOW(),
                    last_error = 'reaped: job exceeded its timeout grace period, retries exhausted',
                    updated_at = NOW()
                WHERE status = 'running'
                    AND started_at < NOW()
                        - ((COALESCE(timeout_seconds, 3600) + $1) * interval '1 second')
                    AND retry_count >= max_retries
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM failed
            "#,
        )
        .bind(grace_period_secs)
        .fetch_one(&self.pool)
        .await?;

        if requeued > 0 || failed > 0 {
            tracing::warn!(
                requeued = requeued,
                failed = failed,
                "Reaped stale running jobs"
            );
        }

        Ok((requeued.max(0) + failed.max(0)) as u64)
    }

    /// Delete finished jobs (completed, failed, cancelled) older than the given
    /// number of days. Used for automatic cleanup to prevent unbounded growth
    /// of the queue table. Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_old_finished_jobs(
        &self,
        older_than_days: i32,
    ) -> Result<u64, PlatformError> {
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            WITH deleted AS (
                DELETE FROM queue_jobs
                WHERE status IN ('completed', 'failed', 'cancelled')
                    AND COALESCE(completed_at, updated_at) < NOW() - ($1 * interval '1 day')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(older_than_days)
        .fetch_one(&self.pool)
        .await?;

        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(
                count = count,
                older_than_days = older_than_days,
                "Deleted old finished jobs"
            );
        }

        Ok(count)
    }

    /// Aggregated queue statistics, optionally scoped to one workspace
    #[tracing::instrument(skip(self))]
    pub async fn get_stats(
        &self,
        workspace_id: Option<Uuid>,
    ) -> Result<JobStats, PlatformError> {
        use sqlx::Row;

        let counts = r#"
            COUNT(*) as total,
            COUNT(*) FILTER (WHERE status = 'pending') as pending,
            COUNT(*) FILTER (WHERE status = 'running') as running,
            COUNT(*) FILTER (WHERE status = 'completed') as completed,
            COUNT(*) FILTER (WHERE status = 'failed') as failed,
            COUNT(*) FILTER (WHERE status = 'scheduled') as scheduled,
            COUNT(*) FILTER (WHERE status = 'cancelled') as cancelled,
            COUNT(*) FILTER (WHERE status = 'blocked') as blocked
        "#;

        let row = match workspace_id {
            Some(workspace_id) => {
                sqlx::query(&format!(
                    "SELECT {counts} FROM queue_jobs WHERE workspace_id = $1"
                ))
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {counts} FROM queue_jobs"))
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(JobStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            running: row.get::<Option<i64>, _>("running").unwrap_or(0),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            scheduled: row.get::<Option<i64>, _>("scheduled").unwrap_or(0),
            cancelled: row.get::<Option<i64>, _>("cancelled").unwrap_or(0),
            blocked: row.get::<Option<i64>, _>("blocked").unwrap_or(0),
        })
    }

    /// Cancel an undispatched job. Returns None when the job does not exist
    /// or is no longer in a cancellable state.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_job(
        &self,
        workspace_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<QueueJob>, PlatformError> {
        let job = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'cancelled',
                updated_at = NOW()
            WHERE workspace_id = $1
                AND id = $2
                AND status IN ('pending', 'scheduled', 'blocked')
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        if job.is_some() {
            tracing::info!(job_id = %job_id, workspace_id = %workspace_id, "Job cancelled");
        }

        Ok(job)
    }

    /// Requeue a failed job from scratch. Returns None when the job does not
    /// exist or is not failed.
    #[tracing::instrument(skip(self))]
    pub async fn retry_job(
        &self,
        workspace_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<QueueJob>, PlatformError> {
        let job = sqlx::query_as::<Postgres, QueueJob>(
            r#"
            UPDATE queue_jobs
            SET status = 'pending',
                retry_count = 0,
                scheduled_at = NOW(),
                started_at = NULL,
                completed_at = NULL,
                result = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE workspace_id = $1
                AND id = $2
                AND status = 'failed'
            RETURNING
                id, workspace_id, job_type, status, priority, payload, result,
                debounce_key, saga_id, scheduled_at, started_at, completed_at,
                retry_count, max_retries, timeout_seconds, last_error,
                created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        if job.is_some() {
            tracing::info!(job_id = %job_id, workspace_id = %workspace_id, "Job manually retried");
        }

        Ok(job)
    }

    /// Drop every undispatched job scoped to a workspace. The workspace
    /// cascade runs this before enqueuing its own cleanup steps, so only the
    /// cascade's jobs survive the purge.
    #[tracing::instrument(skip(self, tx))]
    pub async fn delete_undispatched_workspace_jobs(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
    ) -> Result<u64, PlatformError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE workspace_id = $1
                AND status IN ('pending', 'scheduled', 'blocked')
            "#,
        )
        .bind(workspace_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(
                workspace_id = %workspace_id,
                deleted = result.rows_affected(),
                "Purged undispatched workspace jobs"
            );
        }

        Ok(result.rows_affected())
    }

    /// Drop undispatched copy jobs whose target upload is being deleted, so a
    /// cascade does not race a copy into a vanished upload shell.
    #[tracing::instrument(skip(self, tx, upload_ids))]
    pub async fn delete_pending_copy_jobs_targeting_uploads(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        upload_ids: &[Uuid],
    ) -> Result<u64, PlatformError> {
        if upload_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE workspace_id = $1
                AND job_type = $2
                AND status IN ('pending', 'scheduled', 'blocked')
                AND (payload->>'target_upload_id')::uuid = ANY($3)
            "#,
        )
        .bind(workspace_id)
        .bind(JobType::CopyFile.to_string())
        .bind(upload_ids)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
