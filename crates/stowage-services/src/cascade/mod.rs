//! Cascade orchestrators: bulk delete and move.
//!
//! Both run entirely inside one writer transaction so a cascade either lands
//! whole or not at all. Storage-side consequences (object cleanup, bucket
//! teardown) are fanned out as saga-tracked queue jobs, never performed
//! inline.

pub mod delete;
pub mod move_items;

pub use delete::{BulkDeleteService, DeleteSummary};
pub use move_items::{MoveOutcome, MoveRequest, MoveService};
