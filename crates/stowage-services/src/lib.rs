//! Stowage Services Layer
//!
//! This crate is the **business service layer**: it hosts the orchestration
//! that turns catalog rows, storage calls, and queue jobs into coherent
//! operations (upload lifecycle, pre-signed links, cascade delete/move), plus
//! the job handlers the engine dispatches into. The `Platform` registry wires
//! repositories, the serialized writer, the storage client slot, and the
//! encryption envelope together so embedding binaries depend on a single
//! facade. Keep coordination here; keep thin transport handling outside.

pub mod cascade;
mod dispatch;
pub mod jobs;
pub mod links;
pub mod platform;
pub mod upload;
pub mod workspace;

pub use cascade::{BulkDeleteService, DeleteSummary, MoveOutcome, MoveRequest, MoveService};
pub use jobs::JobHandler;
pub use links::{IssuedDownload, LinkService};
pub use platform::Platform;
pub use stowage_storage::{create_storage_client, StorageClient, StorageError, StorageResult};
pub use upload::{
    resolve_upload_algorithm, AcknowledgeOutcome, ConversionOutcome, UploadPlan, UploadService,
};
pub use workspace::WorkspaceService;
