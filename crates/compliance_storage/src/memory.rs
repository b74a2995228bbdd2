#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use compliance_kernel_contracts::common::validate_object_name;
use compliance_kernel_contracts::object::{ConfigObject, LabelSelector};
use compliance_kernel_contracts::run::{Run, RunName, RunStatus, RunUid};
use compliance_kernel_contracts::{ContractViolation, Deadline, Validate};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use uuid::Uuid;

use crate::repo::{ComplianceRunRepo, ConfigObjectRepo, StorageError, StoreOp};

const RUN_TABLE: &str = "compliance_run";
const CONFIG_OBJECT_TABLE: &str = "config_object";

// Same alphabet the cluster API uses for generated names (no vowels, no ambiguous digits).
const NAME_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const NAME_SUFFIX_LEN: usize = 5;
const NAME_GENERATION_ATTEMPTS: usize = 8;

/// Consulted before every store call; returning `Some` fails the call with that error.
pub type FaultHook = Box<dyn Fn(StoreOp) -> Option<StorageError> + Send + Sync>;

#[derive(Debug, Default)]
struct State {
    runs: BTreeMap<RunName, Run>,
    config_objects: BTreeMap<(String, String), ConfigObject>,
    calls: BTreeMap<StoreOp, u64>,
    resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }
}

pub struct InMemoryResourceStore {
    state: Mutex<State>,
    fault_hook: Mutex<Option<FaultHook>>,
}

impl InMemoryResourceStore {
    pub fn new_in_memory() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fault_hook: Mutex::new(None),
        }
    }

    pub fn set_fault_hook(
        &self,
        hook: impl Fn(StoreOp) -> Option<StorageError> + Send + Sync + 'static,
    ) -> Result<(), StorageError> {
        *self.hook_slot()? = Some(Box::new(hook));
        Ok(())
    }

    pub fn clear_fault_hook(&self) -> Result<(), StorageError> {
        *self.hook_slot()? = None;
        Ok(())
    }

    /// Number of attempted calls of `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.lock()
            .map(|s| s.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn run_count(&self) -> usize {
        self.lock().map(|s| s.runs.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Unavailable {
            detail: "store state lock poisoned".to_string(),
        })
    }

    fn hook_slot(&self) -> Result<MutexGuard<'_, Option<FaultHook>>, StorageError> {
        self.fault_hook.lock().map_err(|_| StorageError::Unavailable {
            detail: "fault hook lock poisoned".to_string(),
        })
    }

    fn begin(
        &self,
        op: StoreOp,
        deadline: Deadline,
    ) -> Result<MutexGuard<'_, State>, StorageError> {
        let mut state = self.lock()?;
        *state.calls.entry(op).or_insert(0) += 1;
        if deadline.expired() {
            return Err(StorageError::DeadlineExceeded { op });
        }
        if let Some(hook) = self.hook_slot()?.as_ref() {
            if let Some(err) = hook(op) {
                debug!(op = %op, error = %err, "injected store fault");
                return Err(err);
            }
        }
        Ok(state)
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl ComplianceRunRepo for InMemoryResourceStore {
    fn create_run(&self, mut run: Run, deadline: Deadline) -> Result<Run, StorageError> {
        run.validate()?;
        let mut state = self.begin(StoreOp::CreateRun, deadline)?;
        if state.runs.contains_key(run.name()) {
            return Err(StorageError::DuplicateKey {
                table: RUN_TABLE,
                key: run.name().to_string(),
            });
        }
        run.metadata.uid = Some(new_uid()?);
        run.metadata.resource_version = state.next_resource_version();
        state.runs.insert(run.name().clone(), run.clone());
        Ok(run)
    }

    fn get_run(&self, name: &RunName, deadline: Deadline) -> Result<Run, StorageError> {
        let state = self.begin(StoreOp::GetRun, deadline)?;
        state
            .runs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                table: RUN_TABLE,
                key: name.to_string(),
            })
    }

    fn patch_run_status(
        &self,
        name: &RunName,
        base: &RunStatus,
        status: RunStatus,
        deadline: Deadline,
    ) -> Result<Run, StorageError> {
        status.validate()?;
        let mut state = self.begin(StoreOp::PatchRunStatus, deadline)?;
        let version = state.resource_version + 1;
        let stored = state
            .runs
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound {
                table: RUN_TABLE,
                key: name.to_string(),
            })?;
        if &stored.status != base {
            return Err(StorageError::Conflict {
                table: RUN_TABLE,
                key: name.to_string(),
            });
        }
        stored.status = status;
        stored.metadata.resource_version = version;
        let patched = stored.clone();
        state.resource_version = version;
        Ok(patched)
    }
}

impl ConfigObjectRepo for InMemoryResourceStore {
    fn create_config_object(
        &self,
        mut object: ConfigObject,
        deadline: Deadline,
    ) -> Result<ConfigObject, StorageError> {
        object.validate()?;
        let mut state = self.begin(StoreOp::CreateConfigObject, deadline)?;

        let name = match (&object.name, &object.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => generate_unique_name(&state, &object.namespace, prefix)?,
            (None, None) => {
                return Err(ContractViolation::InvalidValue {
                    field: "config_object.name",
                    reason: "name or generate_name is required",
                }
                .into())
            }
        };
        validate_object_name("config_object.name", &name)?;

        let key = (object.namespace.clone(), name.clone());
        if state.config_objects.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                table: CONFIG_OBJECT_TABLE,
                key: format!("{}/{}", key.0, key.1),
            });
        }
        object.name = Some(name);
        state.next_resource_version();
        state.config_objects.insert(key, object.clone());
        Ok(object)
    }

    fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
        deadline: Deadline,
    ) -> Result<ConfigObject, StorageError> {
        let state = self.begin(StoreOp::GetConfigObject, deadline)?;
        state
            .config_objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                table: CONFIG_OBJECT_TABLE,
                key: format!("{namespace}/{name}"),
            })
    }

    fn list_config_objects(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
        deadline: Deadline,
    ) -> Result<Vec<ConfigObject>, StorageError> {
        let state = self.begin(StoreOp::ListConfigObjects, deadline)?;
        Ok(state
            .config_objects
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |want| want == ns))
            .filter(|(_, obj)| selector.matches(&obj.labels))
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}

fn generate_unique_name(
    state: &State,
    namespace: &str,
    prefix: &str,
) -> Result<String, StorageError> {
    for _ in 0..NAME_GENERATION_ATTEMPTS {
        let candidate = format!("{prefix}{}", random_suffix());
        if !state
            .config_objects
            .contains_key(&(namespace.to_string(), candidate.clone()))
        {
            return Ok(candidate);
        }
    }
    Err(StorageError::DuplicateKey {
        table: CONFIG_OBJECT_TABLE,
        key: format!("{namespace}/{prefix}*"),
    })
}

fn random_suffix() -> String {
    let mut bytes = [0u8; NAME_SUFFIX_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| NAME_SUFFIX_ALPHABET[*b as usize % NAME_SUFFIX_ALPHABET.len()] as char)
        .collect()
}

fn new_uid() -> Result<RunUid, StorageError> {
    Ok(RunUid::new(Uuid::new_v4().to_string())?)
}
