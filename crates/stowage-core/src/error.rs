//! Error types module
//!
//! This module provides the core error types used throughout the platform.
//! Expected conditions (an upload that is not yet complete, a move into the
//! moved subtree) are modeled as result enums by the services that produce
//! them; `PlatformError` covers the failure paths that propagate with `?`.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx`
//! feature so model-only consumers can build without a database stack.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like unavailable collaborators
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented.
/// This trait allows errors to self-describe how an embedding layer should
/// classify them without string matching.
pub trait ErrorMetadata {
    /// Status code equivalent for collaborator layers (404-equivalent etc.)
    fn status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "DATABASE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Caller-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden outside operator logs
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not yet ready: {0}")]
    NotYetReady(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Blocked: {0}")]
    Blocked(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for PlatformError {
    fn from(err: SqlxError) -> Self {
        PlatformError::Database(err)
    }
}

impl From<anyhow::Error> for PlatformError {
    fn from(err: anyhow::Error) -> Self {
        PlatformError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for PlatformError {
    fn from(err: io::Error) -> Self {
        PlatformError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for PlatformError {
    fn from(err: uuid::Error) -> Self {
        PlatformError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for PlatformError {
    fn from(err: validator::ValidationErrors) -> Self {
        PlatformError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (status, error_code, recoverable, suggested_action, sensitive, log_level).
/// Reduces duplication in ErrorMetadata impl; client_message stays per-variant for dynamic content.
fn platform_error_static_metadata(
    err: &PlatformError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        PlatformError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        PlatformError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        PlatformError::Crypto(_) => (
            500,
            "ENCRYPTION_ERROR",
            false,
            Some("Contact the operator if this error persists"),
            true,
            LogLevel::Error,
        ),
        PlatformError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        PlatformError::NotYetReady(_) => (
            409,
            "NOT_YET_READY",
            true,
            Some("Retry once the operation has completed"),
            false,
            LogLevel::Debug,
        ),
        PlatformError::InvalidTransition(_) => (
            409,
            "INVALID_TRANSITION",
            false,
            Some("Check the target state and try a different operation"),
            false,
            LogLevel::Debug,
        ),
        PlatformError::Blocked(_) => (
            503,
            "BLOCKED",
            true,
            Some("Retry once the required dependency is configured"),
            false,
            LogLevel::Warn,
        ),
        PlatformError::Fatal(_) => (
            500,
            "FATAL",
            false,
            Some("Contact the operator; this requires intervention"),
            true,
            LogLevel::Error,
        ),
        PlatformError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        PlatformError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        PlatformError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl PlatformError {
    /// Recover a typed error carried through an `anyhow` boundary (such as a
    /// transaction helper), falling back to an internal error when the chain
    /// holds something else.
    pub fn from_any(err: anyhow::Error) -> Self {
        match err.downcast::<PlatformError>() {
            Ok(platform_err) => platform_err,
            Err(err) => PlatformError::from(err),
        }
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            PlatformError::Database(_) => "Database",
            PlatformError::Storage(_) => "Storage",
            PlatformError::Crypto(_) => "Crypto",
            PlatformError::NotFound(_) => "NotFound",
            PlatformError::NotYetReady(_) => "NotYetReady",
            PlatformError::InvalidTransition(_) => "InvalidTransition",
            PlatformError::Blocked(_) => "Blocked",
            PlatformError::Fatal(_) => "Fatal",
            PlatformError::InvalidInput(_) => "InvalidInput",
            PlatformError::Internal(_) => "Internal",
            PlatformError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for PlatformError {
    fn status_code(&self) -> u16 {
        platform_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        platform_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        platform_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        platform_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        platform_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        platform_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            PlatformError::Database(_) => "Failed to access database".to_string(),
            PlatformError::Storage(_) => "Failed to access storage".to_string(),
            PlatformError::Crypto(_) => "Failed to apply encryption".to_string(),
            PlatformError::NotFound(ref msg) => msg.clone(),
            PlatformError::NotYetReady(ref msg) => msg.clone(),
            PlatformError::InvalidTransition(ref msg) => msg.clone(),
            PlatformError::Blocked(ref msg) => msg.clone(),
            PlatformError::Fatal(_) => "Internal invariant violated".to_string(),
            PlatformError::InvalidInput(ref msg) => msg.clone(),
            PlatformError::Internal(_) => "Internal error".to_string(),
            PlatformError::InternalWithSource { .. } => "Internal error".to_string(),
        }
    }
}
