//! Data models for the platform
//!
//! This module contains all data structures used throughout the platform,
//! organized by domain. Each sub-module represents a specific feature area.

mod file;
mod folder;
mod job;
mod saga;
mod upload;
mod workspace;

// Re-export all models for convenient imports
pub use file::*;
pub use folder::*;
pub use job::*;
pub use saga::*;
pub use upload::*;
pub use workspace::*;
