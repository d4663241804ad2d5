use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stowage_core::models::{JobType, Saga};
use stowage_core::PlatformError;

/// Repository for saga countdowns.
///
/// A saga is a durable counter: orchestrators register a terminal job, add a
/// step per fanned-out cleanup job, and each step decrements the counter from
/// its finishing transaction. The guarded flag update hands exactly one
/// caller the right to enqueue the terminal job, restarts included.
#[derive(Clone)]
pub struct SagaRepository {
    pool: PgPool,
}

impl SagaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a saga with its terminal job. Steps are added separately
    /// while the orchestrator fans out.
    #[tracing::instrument(
        skip(self, tx, terminal_payload),
        fields(db.table = "sagas", db.operation = "insert")
    )]
    pub async fn create_saga(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: Uuid,
        terminal_job_type: JobType,
        terminal_payload: serde_json::Value,
    ) -> Result<Saga, PlatformError> {
        let saga = sqlx::query_as::<Postgres, Saga>(
            r#"
            INSERT INTO sagas (workspace_id, terminal_job_type, terminal_payload)
            VALUES ($1, $2, $3)
            RETURNING
                id, workspace_id, terminal_job_type, terminal_payload,
                pending_steps, terminal_enqueued, created_at, updated_at
            "#,
        )
        .bind(workspace_id)
        .bind(terminal_job_type.to_string())
        .bind(terminal_payload)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            saga_id = %saga.id,
            workspace_id = %workspace_id,
            terminal_job_type = %terminal_job_type,
            "Saga created"
        );

        Ok(saga)
    }

    /// Add outstanding steps to a saga
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "sagas", db.operation = "update", db.record_id = %saga_id)
    )]
    pub async fn add_steps(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        saga_id: Uuid,
        steps: i32,
    ) -> Result<Saga, PlatformError> {
        let saga = sqlx::query_as::<Postgres, Saga>(
            r#"
            UPDATE sagas
            SET pending_steps = pending_steps + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, workspace_id, terminal_job_type, terminal_payload,
                pending_steps, terminal_enqueued, created_at, updated_at
            "#,
        )
        .bind(saga_id)
        .bind(steps)
        .fetch_one(&mut **tx)
        .await?;

        Ok(saga)
    }

    /// Record one finished step and, when it was the last, claim the right to
    /// enqueue the terminal job.
    ///
    /// Returns the saga exactly once across all callers: only the caller
    /// whose guarded flag update succeeds sees Some, and it must enqueue the
    /// terminal job in the same transaction.
    #[tracing::instrument(
        skip(self, tx),
        fields(db.table = "sagas", db.operation = "update", db.record_id = %saga_id)
    )]
    pub async fn complete_step(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        saga_id: Uuid,
    ) -> Result<Option<Saga>, PlatformError> {
        let updated = sqlx::query(
            r#"
            UPDATE sagas
            SET pending_steps = pending_steps - 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(saga_id)
        .execute(&mut **tx)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::warn!(saga_id = %saga_id, "Step completed against a missing saga");
            return Ok(None);
        }

        self.try_claim_terminal(tx, saga_id).await
    }

    /// Claim the terminal enqueue for a saga with no outstanding steps.
    ///
    /// Orchestrators call this after fan-out to cover the zero-step case;
    /// `complete_step` calls it after each decrement. The flag guard makes
    /// the claim first-caller-wins.
    pub async fn try_claim_terminal(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        saga_id: Uuid,
    ) -> Result<Option<Saga>, PlatformError> {
        let saga = sqlx::query_as::<Postgres, Saga>(
            r#"
            UPDATE sagas
            SET terminal_enqueued = TRUE,
                updated_at = NOW()
            WHERE id = $1
                AND pending_steps <= 0
                AND NOT terminal_enqueued
            RETURNING
                id, workspace_id, terminal_job_type, terminal_payload,
                pending_steps, terminal_enqueued, created_at, updated_at
            "#,
        )
        .bind(saga_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(ref saga) = saga {
            tracing::info!(
                saga_id = %saga.id,
                terminal_job_type = %saga.terminal_job_type,
                "Saga complete, terminal job claimed"
            );
        }

        Ok(saga)
    }

    /// Get saga by ID
    #[tracing::instrument(
        skip(self),
        fields(db.table = "sagas", db.operation = "select", db.record_id = %saga_id)
    )]
    pub async fn get_saga(&self, saga_id: Uuid) -> Result<Option<Saga>, PlatformError> {
        let saga = sqlx::query_as::<Postgres, Saga>(
            r#"
            SELECT
                id, workspace_id, terminal_job_type, terminal_payload,
                pending_steps, terminal_enqueued, created_at, updated_at
            FROM sagas
            WHERE id = $1
            "#,
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(saga)
    }

    /// Delete sagas whose terminal job has been enqueued, once they are older
    /// than the given number of days. Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_finished_sagas(
        &self,
        older_than_days: i32,
    ) -> Result<u64, PlatformError> {
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            WITH deleted AS (
                DELETE FROM sagas
                WHERE terminal_enqueued
                    AND updated_at < NOW() - ($1 * interval '1 day')
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
                "Deleted finished sagas"
            );
        }

        Ok(count)
    }
}
