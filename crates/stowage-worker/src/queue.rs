//! Job engine: worker pool, LISTEN/NOTIFY or polling, retry, and saga
//! step accounting.
//!
//! Jobs are enqueued by the services layer inside catalog transactions, so the
//! engine only consumes: it claims eligible jobs, dispatches them through a
//! [`JobHandlerContext`], and records the outcome. A job that finishes while
//! linked to a saga has its terminal write and the saga countdown in one
//! transaction, so a crash cannot lose the decrement.
//!
//! Shutdown: [`JobEngine::shutdown`] signals the pool to stop; it does not
//! wait for in-flight jobs. For graceful shutdown, coordinate with your
//! runtime and allow time for running jobs to finish before process exit.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use stowage_core::config::{
    JOB_RETENTION_DAYS, QUEUE_BLOCKED_REQUEUE_DELAY_SECS, QUEUE_DEFAULT_TIMEOUT_SECONDS,
    QUEUE_MAX_WORKERS, QUEUE_POLL_INTERVAL_MS, QUEUE_STALE_JOB_GRACE_PERIOD_SECS,
    QUEUE_STALE_JOB_REAP_INTERVAL_SECS,
};
use stowage_core::models::{ExecutorKind, Priority, QueueJob, Saga};
use stowage_core::{JobError, PlatformConfig, PlatformError};
use stowage_db::{CatalogWriter, JobRepository, NewJob, SagaRepository};

use crate::context::JobHandlerContext;

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new job is enqueued.
pub const JOB_NOTIFY_CHANNEL: &str = "stowage_new_job";

/// Maximum delay in seconds before retrying a failed job. Caps exponential
/// backoff so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Interval in seconds between retention sweeps of finished jobs and sagas.
const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Watchdog for catalog-bound executors. These finish in one writer
/// transaction (plus, at most, a quick post-commit effect), so anything
/// running this long is wedged.
const CATALOG_JOB_TIMEOUT_SECS: u64 = 60;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    (2_u64.pow(retry_count as u32)).min(MAX_RETRY_BACKOFF_SECS)
}

/// Watchdog for one dispatch. An explicit per-job timeout wins; otherwise
/// the job type's executor kind decides between the short catalog leash and
/// the configured long-running default.
fn effective_timeout(job: &QueueJob, default_timeout_seconds: i32) -> Duration {
    if let Some(secs) = job.timeout_seconds {
        return Duration::from_secs(secs as u64);
    }
    match job.job_type.executor_kind() {
        ExecutorKind::CatalogOnly | ExecutorKind::CatalogPlusEffect => {
            Duration::from_secs(CATALOG_JOB_TIMEOUT_SECS)
        }
        ExecutorKind::LongRunning => Duration::from_secs(default_timeout_seconds as u64),
    }
}

#[derive(Clone)]
pub struct JobEngineConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Interval in seconds between runs of the stale job reaper. 0 = disabled.
    pub stale_job_reap_interval_secs: u64,
    /// Grace period in seconds added to job timeout before reaping stale running jobs.
    pub stale_job_grace_period_secs: i64,
    /// Delay before a blocked job becomes eligible again.
    pub blocked_requeue_delay_secs: i64,
    /// Retention in days for finished jobs and sagas. 0 disables the janitor.
    pub job_retention_days: i32,
    /// Timeout for long-running jobs that carry no explicit timeout of their own.
    pub default_timeout_seconds: i32,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            max_workers: QUEUE_MAX_WORKERS,
            poll_interval_ms: QUEUE_POLL_INTERVAL_MS,
            stale_job_reap_interval_secs: QUEUE_STALE_JOB_REAP_INTERVAL_SECS,
            stale_job_grace_period_secs: QUEUE_STALE_JOB_GRACE_PERIOD_SECS,
            blocked_requeue_delay_secs: QUEUE_BLOCKED_REQUEUE_DELAY_SECS,
            job_retention_days: JOB_RETENTION_DAYS,
            default_timeout_seconds: QUEUE_DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl JobEngineConfig {
    pub fn from_platform(config: &PlatformConfig) -> Self {
        Self {
            max_workers: config.queue_max_workers,
            poll_interval_ms: config.queue_poll_interval_ms,
            stale_job_reap_interval_secs: config.queue_stale_job_reap_interval_secs,
            stale_job_grace_period_secs: config.queue_stale_job_grace_period_secs,
            blocked_requeue_delay_secs: config.queue_blocked_requeue_delay_secs,
            job_retention_days: config.job_retention_days,
            default_timeout_seconds: config.queue_default_timeout_seconds,
        }
    }
}

#[derive(Clone)]
pub struct JobEngine {
    shutdown_tx: mpsc::Sender<()>,
}

impl JobEngine {
    /// Start the engine with a weak reference to the dispatch context.
    ///
    /// If `pool` is `Some`, the engine uses PostgreSQL LISTEN/NOTIFY to wake
    /// immediately when jobs are enqueued, in addition to polling at
    /// `poll_interval_ms`. If `pool` is `None`, only polling is used.
    pub fn new(
        repository: JobRepository,
        sagas: SagaRepository,
        writer: CatalogWriter,
        config: JobEngineConfig,
        context: Weak<dyn JobHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            Self::worker_pool(repository, sagas, writer, config, context, shutdown_rx, pool).await;
        });

        Self { shutdown_tx }
    }

    async fn worker_pool(
        repository: JobRepository,
        sagas: SagaRepository,
        writer: CatalogWriter,
        config: JobEngineConfig,
        context: Weak<dyn JobHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Job engine worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Channel to wake the main loop when LISTEN receives a NOTIFY (avoids
        // blocking on recv when no pool).
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        // Spawn stale job reaper (if interval > 0)
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_job_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let reap_interval = Duration::from_secs(config.stale_job_reap_interval_secs);
            let grace_period = config.stale_job_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = repo_for_reaper.reap_stale_running_jobs(grace_period).await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        // Spawn retention janitor for finished jobs and sagas (if enabled)
        let (janitor_shutdown_tx, mut janitor_shutdown_rx) = mpsc::channel::<()>(1);
        if config.job_retention_days > 0 {
            let repo_for_janitor = repository.clone();
            let sagas_for_janitor = sagas.clone();
            let retention_days = config.job_retention_days;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(RETENTION_SWEEP_INTERVAL_SECS));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match repo_for_janitor.delete_old_finished_jobs(retention_days).await {
                                Ok(deleted) if deleted > 0 => {
                                    tracing::info!(deleted, "Deleted old finished jobs");
                                }
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "Finished job cleanup failed"),
                            }
                            match sagas_for_janitor.delete_finished_sagas(retention_days).await {
                                Ok(deleted) if deleted > 0 => {
                                    tracing::info!(deleted, "Deleted old finished sagas");
                                }
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "Finished saga cleanup failed"),
                            }
                        }
                        _ = janitor_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job engine worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    let _ = janitor_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(
                        &repository,
                        &sagas,
                        &writer,
                        &semaphore,
                        &context,
                        &config,
                    ).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(
                        &repository,
                        &sagas,
                        &writer,
                        &semaphore,
                        &context,
                        &config,
                    ).await;
                }
            }
        }

        tracing::info!("Job engine worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        repository: &JobRepository,
        sagas: &SagaRepository,
        writer: &CatalogWriter,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
        config: &JobEngineConfig,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next_job().await {
            Ok(Some(job)) => {
                let repo = repository.clone();
                let sagas = sagas.clone();
                let writer = writer.clone();
                let ctx = context.clone();
                let config = config.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) =
                        Self::process_job_with_retry(job, repo, sagas, writer, ctx, config).await
                    {
                        tracing::error!(error = %e, "Job processing failed after retries");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    #[tracing::instrument(skip_all, fields(job.id = %job.id, job.type = %job.job_type))]
    async fn process_job_with_retry(
        job: QueueJob,
        repository: JobRepository,
        sagas: SagaRepository,
        writer: CatalogWriter,
        context: Weak<dyn JobHandlerContext>,
        config: JobEngineConfig,
    ) -> Result<()> {
        let ctx = context
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("JobHandlerContext was dropped, cannot process job"))?;

        let timeout_duration = effective_timeout(&job, config.default_timeout_seconds);

        let result = tokio::time::timeout(timeout_duration, ctx.dispatch_job(&job)).await;

        match result {
            Ok(Ok(job_result)) => {
                Self::finish_completed(&repository, &sagas, &writer, &job, job_result).await?;
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job completed successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                // A blocked job is parked, not failed: its precondition is
                // unavailable and retrying sooner would not help.
                if let Some(PlatformError::Blocked(reason)) = e.downcast_ref::<PlatformError>() {
                    tracing::warn!(
                        job_id = %job.id,
                        reason = %reason,
                        "Job blocked, parking for later"
                    );
                    repository
                        .mark_blocked(job.id, reason, config.blocked_requeue_delay_secs)
                        .await
                        .context("Failed to mark job as blocked")?;
                    return Ok(());
                }

                // Check if this is a JobError with unrecoverable flag
                let is_unrecoverable = e
                    .downcast_ref::<JobError>()
                    .map(|je| !je.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Job execution failed"
                );

                // Don't retry if the error is explicitly marked as unrecoverable
                if is_unrecoverable {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": job.retry_count,
                        "unrecoverable": true,
                        "reason": "Job failed with unrecoverable error (e.g., corrupt payload, missing configuration)"
                    });
                    Self::finish_failed(&repository, &sagas, &writer, &job, error_result).await?;
                    tracing::error!(
                        job_id = %job.id,
                        "Job failed with unrecoverable error, will not retry"
                    );
                    return Err(e);
                }

                // Retry if the error is recoverable and we haven't exceeded max retries
                if job.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(job.retry_count);
                    tracing::info!(
                        job_id = %job.id,
                        retry_count = job.retry_count + 1,
                        backoff_seconds = backoff_seconds,
                        "Scheduling job retry"
                    );
                    repository
                        .increment_retry(job.id, backoff_seconds as i64, &e.to_string())
                        .await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": job.retry_count,
                        "reason": "Job failed after maximum retries"
                    });
                    Self::finish_failed(&repository, &sagas, &writer, &job, error_result).await?;
                    tracing::error!(job_id = %job.id, "Job failed after max retries");
                    Err(e)
                }
            }
            Err(_) => {
                tracing::error!(
                    job_id = %job.id,
                    timeout_seconds = timeout_duration.as_secs(),
                    "Job execution timed out"
                );
                if job.can_retry() {
                    let backoff_seconds = compute_retry_backoff_seconds(job.retry_count);
                    repository
                        .increment_retry(job.id, backoff_seconds as i64, "Job execution timed out")
                        .await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": "Job execution timed out",
                        "timeout_seconds": timeout_duration.as_secs(),
                    });
                    Self::finish_failed(&repository, &sagas, &writer, &job, error_result).await?;
                    Err(anyhow::anyhow!("Job execution timed out"))
                }
            }
        }
    }

    /// Record a successful result. A saga-linked job commits its terminal
    /// write together with the saga decrement.
    async fn finish_completed(
        repository: &JobRepository,
        sagas: &SagaRepository,
        writer: &CatalogWriter,
        job: &QueueJob,
        result: serde_json::Value,
    ) -> Result<()> {
        match job.saga_id {
            None => {
                repository
                    .mark_completed(job.id, result)
                    .await
                    .context("Failed to mark job as completed")?;
            }
            Some(saga_id) => {
                let repo = repository.clone();
                let sagas = sagas.clone();
                let job_id = job.id;
                writer
                    .write(move |tx| {
                        Box::pin(async move {
                            repo.mark_completed_in_tx(tx, job_id, result).await?;
                            if let Some(saga) = sagas.complete_step(tx, saga_id).await? {
                                Self::enqueue_terminal(&repo, tx, &saga).await?;
                            }
                            Ok::<_, PlatformError>(())
                        })
                    })
                    .await
                    .context("Failed to finalize completed saga job")?;
            }
        }
        Ok(())
    }

    /// Record a terminal failure. A failed step still counts as finished for
    /// its saga: the terminal cleanup must eventually run either way.
    async fn finish_failed(
        repository: &JobRepository,
        sagas: &SagaRepository,
        writer: &CatalogWriter,
        job: &QueueJob,
        error_result: serde_json::Value,
    ) -> Result<()> {
        match job.saga_id {
            None => {
                repository
                    .mark_failed(job.id, error_result)
                    .await
                    .context("Failed to mark job as failed")?;
            }
            Some(saga_id) => {
                let repo = repository.clone();
                let sagas = sagas.clone();
                let job_id = job.id;
                writer
                    .write(move |tx| {
                        Box::pin(async move {
                            repo.mark_failed_in_tx(tx, job_id, error_result).await?;
                            if let Some(saga) = sagas.complete_step(tx, saga_id).await? {
                                Self::enqueue_terminal(&repo, tx, &saga).await?;
                            }
                            Ok::<_, PlatformError>(())
                        })
                    })
                    .await
                    .context("Failed to finalize failed saga job")?;
            }
        }
        Ok(())
    }

    async fn enqueue_terminal(
        repository: &JobRepository,
        tx: &mut Transaction<'_, Postgres>,
        saga: &Saga,
    ) -> Result<(), PlatformError> {
        let terminal = NewJob {
            workspace_id: Some(saga.workspace_id),
            job_type: saga.terminal_job_type.clone(),
            payload: saga.terminal_payload.clone(),
            priority: Priority::Normal,
            debounce_key: saga.terminal_debounce_key(),
            saga_id: None,
            scheduled_at: None,
            max_retries: None,
            timeout_seconds: None,
        };
        if repository.enqueue_job(tx, terminal).await?.is_none() {
            tracing::debug!(
                saga_id = %saga.id,
                "Terminal job collapsed into an undispatched equivalent"
            );
        }
        Ok(())
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main loop.
    ///
    /// This method returns immediately after sending the signal; it does
    /// **not** wait for the worker pool to finish or for in-flight jobs to
    /// complete. Already-spawned job handlers continue running until they
    /// complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job engine shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stowage_core::models::{JobStatus, JobType};
    use uuid::Uuid;

    fn test_job(job_type: JobType, timeout_seconds: Option<i32>) -> QueueJob {
        QueueJob {
            id: Uuid::new_v4(),
            workspace_id: None,
            job_type,
            status: JobStatus::Pending,
            priority: Priority::Normal.into(),
            payload: json!({}),
            result: None,
            debounce_key: None,
            saga_id: None,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout_seconds,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_job_timeout_overrides_executor_default() {
        let job = test_job(JobType::CopyFile, Some(15));
        assert_eq!(effective_timeout(&job, 3600), Duration::from_secs(15));
    }

    #[test]
    fn catalog_bound_jobs_get_short_watchdog() {
        let recompute = test_job(JobType::RecomputeWorkspaceSize, None);
        assert_eq!(
            effective_timeout(&recompute, 3600),
            Duration::from_secs(CATALOG_JOB_TIMEOUT_SECS)
        );
        let sweep = test_job(JobType::SweepExpiredUploads, None);
        assert_eq!(
            effective_timeout(&sweep, 3600),
            Duration::from_secs(CATALOG_JOB_TIMEOUT_SECS)
        );
    }

    #[test]
    fn long_running_jobs_use_configured_default() {
        let job = test_job(JobType::CopyFile, None);
        assert_eq!(effective_timeout(&job, 1200), Duration::from_secs(1200));
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(10), MAX_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn unrecoverable_job_error_detected() {
        let err: anyhow::Error = JobError::unrecoverable(anyhow::anyhow!("bad config")).into();
        let is_unrecoverable = err
            .downcast_ref::<JobError>()
            .map(|je| !je.is_recoverable())
            .unwrap_or(false);
        assert!(is_unrecoverable);
    }

    #[test]
    fn recoverable_job_error_detected() {
        let err: anyhow::Error = JobError::recoverable(anyhow::anyhow!("network")).into();
        let is_unrecoverable = err
            .downcast_ref::<JobError>()
            .map(|je| !je.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }

    #[test]
    fn non_job_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("generic error");
        let is_unrecoverable = err
            .downcast_ref::<JobError>()
            .map(|je| !je.is_recoverable())
            .unwrap_or(false);
        assert!(!is_unrecoverable);
    }

    #[test]
    fn blocked_error_detected_through_anyhow() {
        let err: anyhow::Error =
            PlatformError::Blocked("no storage client configured".to_string()).into();
        match err.downcast_ref::<PlatformError>() {
            Some(PlatformError::Blocked(reason)) => {
                assert_eq!(reason, "no storage client configured");
            }
            other => panic!("expected Blocked, got {:?}", other),
        }
    }

    #[test]
    fn engine_config_defaults_follow_platform_constants() {
        let config = JobEngineConfig::default();
        assert_eq!(config.max_workers, QUEUE_MAX_WORKERS);
        assert_eq!(config.poll_interval_ms, QUEUE_POLL_INTERVAL_MS);
        assert_eq!(config.blocked_requeue_delay_secs, QUEUE_BLOCKED_REQUEUE_DELAY_SECS);
        assert_eq!(config.job_retention_days, JOB_RETENTION_DAYS);
        assert_eq!(config.default_timeout_seconds, QUEUE_DEFAULT_TIMEOUT_SECONDS);
    }
}
