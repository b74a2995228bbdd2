#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use compliance_engines::assembler::{AssemblyError, ConfigAssembler, RulesetCatalog};
use compliance_engines::condition::{remove_condition, update_conditions, ConditionUpdate};
use compliance_kernel_contracts::common::validate_object_name;
use compliance_kernel_contracts::config_doc::{digest_hex, ConfigRenderError};
use compliance_kernel_contracts::object::{validate_labels, ConfigObject, Labels};
use compliance_kernel_contracts::run::{
    ConditionStatus, ConditionType, Run, RunName, RunPhase, RunStatus,
};
use compliance_kernel_contracts::{ContractViolation, Deadline};
use compliance_storage::{ResourceStore, StorageError};
use tracing::{debug, info, warn};

use crate::option_source::StoreOptionSource;

pub mod reason_codes {
    pub const COMPLIANCE_RUN_RUNNING: &str = "ComplianceRunRunning";
    pub const COMPLIANCE_RUN_COMPLETED: &str = "ComplianceRunCompleted";
    pub const COMPLIANCE_RUN_FAILED: &str = "ComplianceRunFailed";
}

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_NAME_LABEL_VALUE: &str = "compliance-runner";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_LABEL_VALUE: &str = "compliance-operator";
pub const RUN_LABEL: &str = "compliance.operator.io/run";

pub const CONFIG_OBJECT_GENERATE_NAME: &str = "compliance-config-";
pub const CONFIG_DOCUMENT_KEY: &str = "config.yaml";

const RUNNING_MESSAGE: &str = "compliance run is running";
const COMPLETED_MESSAGE: &str = "compliance run has completed successfully";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunControllerConfig {
    /// Namespace generated config objects are created in.
    pub config_namespace: String,
    /// Copied onto every generated config object before the run label.
    pub extra_labels: Labels,
}

impl RunControllerConfig {
    pub fn mvp_v1() -> Self {
        Self {
            config_namespace: "kube-system".to_string(),
            extra_labels: Labels::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NotFound,
    AlreadyProcessed(RunPhase),
    Completed {
        config_object_name: String,
        config_digest: String,
    },
    Failed {
        message: String,
    },
}

/// Why a run was driven to `Failed`. The display text lands in the Failed condition.
#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    #[error("failed to update phase to Running: {0}")]
    PersistRunning(StorageError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Render(#[from] ConfigRenderError),
    #[error("invalid config object: {0}")]
    Contract(#[from] ContractViolation),
    #[error("failed to create config object: {0}")]
    CreateConfigObject(StorageError),
    #[error("failed to update phase to Completed: {0}")]
    PersistCompleted(StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to get compliance run {name}: {source}")]
    Load { name: RunName, source: StorageError },
    #[error(
        "failed to update compliance run {name} to Failed: {source}, original error: {failure}"
    )]
    PersistFailed {
        name: RunName,
        source: StorageError,
        failure: RunFailure,
    },
}

/// Drives a run from `Unset` through `Running` to `Completed` or `Failed`.
pub struct RunController<S: ResourceStore + ?Sized> {
    config: RunControllerConfig,
    store: Arc<S>,
    assembler: ConfigAssembler,
    clock: Arc<dyn Clock>,
}

impl<S: ResourceStore + ?Sized> RunController<S> {
    pub fn new(
        config: RunControllerConfig,
        store: Arc<S>,
        catalog: RulesetCatalog,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ContractViolation> {
        validate_object_name("run_controller_config.config_namespace", &config.config_namespace)?;
        validate_labels("run_controller_config.extra_labels", &config.extra_labels)?;
        Ok(Self {
            config,
            store,
            assembler: ConfigAssembler::new(catalog),
            clock,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn reconcile(
        &self,
        name: &RunName,
        deadline: Deadline,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let run = match self.store.get_run(name, deadline) {
            Ok(run) => run,
            Err(err) if err.is_not_found() => {
                debug!(run = %name, "compliance run is gone, stop reconciling");
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(source) => {
                return Err(ReconcileError::Load {
                    name: name.clone(),
                    source,
                })
            }
        };

        if let Some(phase) = run.phase() {
            info!(run = %name, phase = %phase, "compliance run already processed");
            return Ok(ReconcileOutcome::AlreadyProcessed(phase));
        }

        // Last status confirmed by the store; every patch is conditional on it.
        let mut durable = run.status.clone();
        match self.drive(&run, &mut durable, deadline) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => self.fail(name, &durable, failure, deadline),
        }
    }

    fn drive(
        &self,
        run: &Run,
        durable: &mut RunStatus,
        deadline: Deadline,
    ) -> Result<ReconcileOutcome, RunFailure> {
        let name = run.name();

        let mut running = durable.clone();
        update_conditions(
            &mut running.conditions,
            &ConditionType::COMPLETED,
            &ConditionUpdate::v1(
                ConditionStatus::False,
                reason_codes::COMPLIANCE_RUN_RUNNING,
                RUNNING_MESSAGE,
            ),
            self.clock.now(),
        );
        running.phase = Some(RunPhase::Running);
        let patched = self
            .store
            .patch_run_status(name, durable, running, deadline)
            .map_err(RunFailure::PersistRunning)?;
        *durable = patched.status;
        info!(run = %name, "updated phase to Running");

        let source = StoreOptionSource::new(self.store.as_ref(), deadline);
        let document = self.assembler.assemble(&run.spec.rulesets, &source)?;
        let rendered = document.to_yaml()?;
        let digest = digest_hex(&rendered);

        let mut data = BTreeMap::new();
        data.insert(CONFIG_DOCUMENT_KEY.to_string(), rendered);
        let object = ConfigObject::generated(
            self.config.config_namespace.clone(),
            CONFIG_OBJECT_GENERATE_NAME,
            self.labels_for(run)?,
            data,
        )?;
        let created = self
            .store
            .create_config_object(object, deadline)
            .map_err(RunFailure::CreateConfigObject)?;
        let config_object_name = created.name.unwrap_or_default();
        info!(
            run = %name,
            config_object = %format!("{}/{}", created.namespace, config_object_name),
            digest = %digest,
            "created config object"
        );

        let mut completed = durable.clone();
        completed.phase = Some(RunPhase::Completed);
        update_conditions(
            &mut completed.conditions,
            &ConditionType::COMPLETED,
            &ConditionUpdate::v1(
                ConditionStatus::True,
                reason_codes::COMPLIANCE_RUN_COMPLETED,
                COMPLETED_MESSAGE,
            ),
            self.clock.now(),
        );
        let patched = self
            .store
            .patch_run_status(name, durable, completed, deadline)
            .map_err(RunFailure::PersistCompleted)?;
        *durable = patched.status;
        info!(run = %name, "updated phase to Completed");

        Ok(ReconcileOutcome::Completed {
            config_object_name,
            config_digest: digest,
        })
    }

    fn fail(
        &self,
        name: &RunName,
        durable: &RunStatus,
        failure: RunFailure,
        deadline: Deadline,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let message = format!("compliance run failed with error: {failure}");

        let failed = self.failed_status(durable, &message);
        let persisted = match self.store.patch_run_status(name, durable, failed, deadline) {
            // Someone else wrote the status since we read it: one re-read, one retry.
            Err(StorageError::Conflict { .. }) => {
                debug!(run = %name, "status changed concurrently, re-reading before Failed");
                self.store
                    .get_run(name, deadline)
                    .and_then(|fresh| match fresh.phase() {
                        Some(phase) if phase.is_terminal() => Ok(Some(phase)),
                        _ => {
                            let failed = self.failed_status(&fresh.status, &message);
                            self.store
                                .patch_run_status(name, &fresh.status, failed, deadline)
                                .map(|_| None)
                        }
                    })
            }
            other => other.map(|_| None),
        };

        match persisted {
            Ok(None) => {
                info!(run = %name, error = %failure, "updated phase to Failed");
                Ok(ReconcileOutcome::Failed { message })
            }
            Ok(Some(phase)) => {
                info!(
                    run = %name,
                    phase = %phase,
                    error = %failure,
                    "compliance run finished concurrently"
                );
                Ok(ReconcileOutcome::AlreadyProcessed(phase))
            }
            Err(source) => {
                warn!(run = %name, error = %source, "failed to update phase to Failed");
                Err(ReconcileError::PersistFailed {
                    name: name.clone(),
                    source,
                    failure,
                })
            }
        }
    }

    /// `base` with Failed=True recorded and any Completed condition dropped.
    fn failed_status(&self, base: &RunStatus, message: &str) -> RunStatus {
        let mut failed = base.clone();
        failed.phase = Some(RunPhase::Failed);
        update_conditions(
            &mut failed.conditions,
            &ConditionType::FAILED,
            &ConditionUpdate::v1(
                ConditionStatus::True,
                reason_codes::COMPLIANCE_RUN_FAILED,
                message,
            ),
            self.clock.now(),
        );
        remove_condition(&mut failed.conditions, &ConditionType::COMPLETED);
        failed
    }

    fn labels_for(&self, run: &Run) -> Result<Labels, ContractViolation> {
        let uid = run
            .metadata
            .uid
            .as_ref()
            .ok_or(ContractViolation::InvalidValue {
                field: "run.metadata.uid",
                reason: "must be assigned before a config object is generated",
            })?;

        let mut labels = Labels::new();
        labels.insert(APP_NAME_LABEL.to_string(), APP_NAME_LABEL_VALUE.to_string());
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_LABEL_VALUE.to_string());
        labels.extend(self.config.extra_labels.clone());
        labels.insert(RUN_LABEL.to_string(), uid.to_string());
        Ok(labels)
    }
}
