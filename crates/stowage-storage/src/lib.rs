//! Stowage Storage Library
//!
//! This crate provides the storage abstraction and backend implementations.
//! It includes the StorageClient trait and implementations for S3-compatible
//! providers and the local filesystem.
//!
//! # Key and bucket layout
//!
//! Each workspace owns one bucket (`stowage-{workspace_id}`); objects use
//! the key `files/{file_id}`. Keys must not contain `..` or a leading `/`.
//! Naming is centralized in the `keys` module so all backends stay
//! consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod permits;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage_client;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use permits::PermitPool;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use stowage_core::StorageBackend;
pub use traits::{
    collect_stream, ByteRange, ByteStream, StorageClient, StorageError, StorageResult,
    UploadedPart,
};
