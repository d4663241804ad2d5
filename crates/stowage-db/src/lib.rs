//! Stowage Database Layer
//!
//! This crate provides the catalog repositories and transaction plumbing for
//! the storage platform: workspaces, folders, files, in-flight uploads, the
//! durable job queue, and saga countdowns.
//!
// Module declarations
pub mod db;

// Re-exports: repositories
pub use db::{
    FileRepository, FolderRepository, JobRepository, SagaRepository, UploadRepository,
    WorkspaceRepository,
};

// Re-exports: write-side input records
pub use db::file::NewFile;
pub use db::job::NewJob;
pub use db::upload::NewUpload;

// Re-exports: transaction utilities and the serialized writer
pub use db::setup::setup_database;
pub use db::transaction::{defer_constraints, with_transaction, TransactionGuard};
pub use db::writer::{CatalogWriter, CommitEffect};
