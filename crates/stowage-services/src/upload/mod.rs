//! Upload lifecycle: algorithm selection, part ingestion, conversion.

pub mod algorithm;
pub mod service;

pub use algorithm::{resolve_upload_algorithm, UploadPlan};
pub use service::{AcknowledgeOutcome, ConversionOutcome, UploadService};
