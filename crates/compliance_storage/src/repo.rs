#![forbid(unsafe_code)]

use std::fmt;

use compliance_kernel_contracts::object::{ConfigObject, LabelSelector};
use compliance_kernel_contracts::run::{Run, RunName, RunStatus};
use compliance_kernel_contracts::{ContractViolation, Deadline};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("{table} {key} not found")]
    NotFound { table: &'static str, key: String },
    #[error("{table} {key} already exists")]
    DuplicateKey { table: &'static str, key: String },
    #[error(
        "conflict on {table} {key}: the object has been modified; \
         retry against the latest version"
    )]
    Conflict { table: &'static str, key: String },
    #[error("{op} exceeded its deadline")]
    DeadlineExceeded { op: StoreOp },
    #[error("store unavailable: {detail}")]
    Unavailable { detail: String },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Store operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    CreateRun,
    GetRun,
    PatchRunStatus,
    CreateConfigObject,
    GetConfigObject,
    ListConfigObjects,
}

impl StoreOp {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOp::CreateRun => "create_run",
            StoreOp::GetRun => "get_run",
            StoreOp::PatchRunStatus => "patch_run_status",
            StoreOp::CreateConfigObject => "create_config_object",
            StoreOp::GetConfigObject => "get_config_object",
            StoreOp::ListConfigObjects => "list_config_objects",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ComplianceRunRepo: Send + Sync {
    /// Stores a new run. The store assigns uid and resource version.
    fn create_run(&self, run: Run, deadline: Deadline) -> Result<Run, StorageError>;

    fn get_run(&self, name: &RunName, deadline: Deadline) -> Result<Run, StorageError>;

    /// Replaces the status subresource only if the stored status still equals `base`.
    fn patch_run_status(
        &self,
        name: &RunName,
        base: &RunStatus,
        status: RunStatus,
        deadline: Deadline,
    ) -> Result<Run, StorageError>;
}

pub trait ConfigObjectRepo: Send + Sync {
    /// Stores a new object, resolving `generate_name` into a unique name.
    fn create_config_object(
        &self,
        object: ConfigObject,
        deadline: Deadline,
    ) -> Result<ConfigObject, StorageError>;

    fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
        deadline: Deadline,
    ) -> Result<ConfigObject, StorageError>;

    /// Objects in `namespace` (all namespaces when `None`) whose labels match `selector`,
    /// ordered by (namespace, name).
    fn list_config_objects(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
        deadline: Deadline,
    ) -> Result<Vec<ConfigObject>, StorageError>;
}

pub trait ResourceStore: ComplianceRunRepo + ConfigObjectRepo {}

impl<T: ComplianceRunRepo + ConfigObjectRepo + ?Sized> ResourceStore for T {}
