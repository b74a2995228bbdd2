#![forbid(unsafe_code)]

pub mod memory;
pub mod repo;

pub use repo::{ComplianceRunRepo, ConfigObjectRepo, ResourceStore, StorageError};
