//! Database repositories for the catalog data access layer
//!
//! Each repository is responsible for a specific domain entity and provides
//! CRUD operations and specialized queries. Read paths run against the pool;
//! every catalog mutation takes a `&mut Transaction` so it can only execute
//! inside a `CatalogWriter` transaction.
//
// Catalog repositories
pub mod file;
pub mod folder;
pub mod job;
pub mod saga;
pub mod upload;
pub mod workspace;
//
// Pool construction and migrations
pub mod setup;
//
// Transaction utilities
pub mod transaction;
//
// Serialized catalog writer
pub mod writer;

pub use file::FileRepository;
pub use folder::FolderRepository;
pub use job::JobRepository;
pub use saga::SagaRepository;
pub use upload::UploadRepository;
pub use workspace::WorkspaceRepository;
