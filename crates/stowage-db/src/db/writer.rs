//! Serialized catalog writer
//!
//! Every catalog mutation in the platform runs inside a transaction obtained
//! from the one `CatalogWriter`. An async mutex gate admits one transaction at
//! a time, so catalog writes are totally ordered: no write-write races on the
//! folder ancestor index, part bookkeeping, or saga countdowns, and no
//! serialization failures to retry around.
//!
//! Handlers that must touch storage after a commit (delete objects for rows
//! that are now gone, for example) return a `CommitEffect`; the writer runs it
//! after the commit and after the gate is released, so slow network calls
//! never extend the critical section.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Deferred work scheduled by a writer closure, executed after commit.
///
/// Effects run outside the writer gate and cannot fail the already-committed
/// transaction; anything fallible inside one must handle its own errors
/// (typically by enqueuing a cleanup job beforehand, inside the transaction).
pub type CommitEffect = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The single write path into the catalog.
///
/// Cloning is cheap and every clone shares the same gate.
#[derive(Clone)]
pub struct CatalogWriter {
    pool: PgPool,
    gate: Arc<Mutex<()>>,
}

impl CatalogWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Read-only access to the underlying pool, for queries that do not
    /// mutate the catalog and therefore skip the gate.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run one serialized catalog transaction.
    ///
    /// The closure's statements commit atomically; any error rolls the whole
    /// transaction back and the gate is released either way.
    #[tracing::instrument(skip_all)]
    pub async fn write<F, R, E>(&self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(
            &'a mut Transaction<'_, Postgres>,
        )
            -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'a>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _gate = self.gate.lock().await;
        let started = std::time::Instant::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin writer transaction")?;

        match f(&mut tx).await {
            Ok(result) => {
                tx.commit()
                    .await
                    .context("Failed to commit writer transaction")?;
                tracing::debug!(
                    duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Writer transaction committed"
                );
                Ok(result)
            }
            Err(e) => {
                tx.rollback().await.ok();
                tracing::debug!(
                    duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Writer transaction rolled back"
                );
                Err(anyhow::Error::from(e))
            }
        }
    }

    /// Run one serialized catalog transaction that may schedule a post-commit
    /// effect.
    ///
    /// The effect runs only if the transaction committed, strictly after the
    /// gate is released. A rolled-back transaction drops its effect unrun.
    #[tracing::instrument(skip_all)]
    pub async fn write_with_effect<F, R, E>(&self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(
            &'a mut Transaction<'_, Postgres>,
        ) -> Pin<
            Box<dyn Future<Output = Result<(R, Option<CommitEffect>), E>> + Send + 'a>,
        >,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (result, effect) = {
            let _gate = self.gate.lock().await;
            let started = std::time::Instant::now();

            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin writer transaction")?;

            match f(&mut tx).await {
                Ok((result, effect)) => {
                    tx.commit()
                        .await
                        .context("Failed to commit writer transaction")?;
                    tracing::debug!(
                        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                        has_effect = effect.is_some(),
                        "Writer transaction committed"
                    );
                    (result, effect)
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    return Err(anyhow::Error::from(e));
                }
            }
        };

        if let Some(effect) = effect {
            effect.await;
        }

        Ok(result)
    }
}
