//! Stowage Worker Library
//!
//! Background job processing: the engine claims jobs from the durable queue,
//! dispatches them through a handler context implemented by the embedding
//! application, retries with exponential backoff, parks blocked jobs, reaps
//! jobs abandoned by dead workers, and drives saga countdowns to their
//! terminal job.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, JobHandlerContext};
pub use queue::{JobEngine, JobEngineConfig, JOB_NOTIFY_CHANNEL, MAX_RETRY_BACKOFF_SECS};
