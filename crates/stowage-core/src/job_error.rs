//! Job execution error types
//!
//! This module provides error types specifically for queue-job execution,
//! allowing handlers to indicate whether an error is recoverable (should be
//! retried with backoff) or unrecoverable (should fail immediately without
//! retrying).

use std::fmt;

/// Job execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// Create a new unrecoverable job error
    ///
    /// Unrecoverable errors will cause the job to fail immediately without retrying.
    /// Use this for errors like:
    /// - Corrupt or unknown job payloads
    /// - Missing or invalid configuration (master key, credentials)
    /// - Invalid input data that won't change on retry
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Create a new recoverable job error
    ///
    /// Recoverable errors will be retried according to the job's retry policy.
    /// Use this for errors like:
    /// - Transient network failures against a storage backend
    /// - Temporary resource unavailability
    /// - Backend throttling
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    /// Check if this error is recoverable (should be retried)
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Get the inner error
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Consume self and return the inner error
    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Default conversion from anyhow::Error creates a recoverable error
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

// Note: From<JobError> for anyhow::Error is automatically implemented by anyhow
// via its blanket implementation for any type that implements std::error::Error

/// Extension trait for Result to easily create unrecoverable job errors
pub trait JobResultExt<T> {
    /// Mark this result as unrecoverable on error
    fn unrecoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_error() {
        let err = JobError::unrecoverable(anyhow::anyhow!("Missing master key"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("Missing master key"));
    }

    #[test]
    fn test_recoverable_error() {
        let err = JobError::recoverable(anyhow::anyhow!("Network timeout"));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Network timeout"));
    }

    #[test]
    fn test_from_anyhow() {
        let err: JobError = anyhow::anyhow!("Some error").into();
        assert!(err.is_recoverable(), "Default should be recoverable");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("Corrupt payload"));
        let job_result = result.unrecoverable();
        assert!(job_result.is_err());
        assert!(!job_result.unwrap_err().is_recoverable());
    }
}
