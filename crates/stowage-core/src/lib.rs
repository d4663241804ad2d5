//! Stowage Core Library
//!
//! This crate provides the domain models, error types, configuration, and
//! cryptographic primitives shared across all Stowage components.

pub mod config;
pub mod encryption;
pub mod error;
pub mod job_error;
pub mod models;
pub mod signed_link;
pub mod storage_types;

// Re-export commonly used types
pub use config::PlatformConfig;
pub use encryption::{
    ChunkSpan, EncryptionEnvelope, EncryptionMeta, EncryptionMode, MasterKeyRing,
    ENCRYPTION_CHUNK_SIZE,
};
pub use error::{ErrorMetadata, LogLevel, PlatformError};
pub use job_error::{JobError, JobResultExt};
pub use signed_link::{ContentDisposition, LinkAction, LinkValidation, SignedLink};
pub use storage_types::StorageBackend;
