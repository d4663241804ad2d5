//! Job handler context trait
//!
//! The embedding application implements this trait for its platform state.
//! The engine calls `dispatch_job` when processing a claimed job; the
//! implementation matches on job type and invokes the appropriate handler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use stowage_core::models::QueueJob;

/// Context for job dispatch.
///
/// Implemented by the platform's application state. The engine holds a weak
/// reference and calls `dispatch_job` when processing a claimed job.
///
/// Returning `Ok` marks the job completed with the returned value as its
/// result. Returning an error wrapping [`stowage_core::JobError`] marked
/// unrecoverable fails the job without retrying; an error wrapping
/// [`stowage_core::PlatformError::Blocked`] parks the job for a later
/// attempt without burning a retry; anything else retries with backoff.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Dispatch a job to the appropriate handler and return the result.
    async fn dispatch_job(self: Arc<Self>, job: &QueueJob) -> Result<serde_json::Value>;
}

/// Placeholder context used when no real context exists yet (e.g. during init).
/// Dispatch always errors.
struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn dispatch_job(self: Arc<Self>, _job: &QueueJob) -> Result<serde_json::Value> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// Returns a weak reference to a no-op context. Use as placeholder when
/// building a JobEngine before the real platform context exists.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
