#![forbid(unsafe_code)]

pub mod config;
pub mod http;
pub mod manifests;
pub mod metrics;
pub mod queue;
pub mod worker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use compliance_engines::assembler::RulesetCatalog;
use compliance_kernel_contracts::ContractViolation;
use compliance_os::run_controller::{RunController, SystemClock};
use compliance_storage::memory::InMemoryResourceStore;
use compliance_storage::ResourceStore;

use crate::config::OperatorConfig;
use crate::http::AppState;
use crate::metrics::{MetricsError, ReconcileMetrics};
use crate::queue::WorkQueue;
use crate::worker::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ContractViolation),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Everything the operator process wires together, built from one config.
pub struct OperatorRuntime {
    pub config: OperatorConfig,
    pub store: Arc<InMemoryResourceStore>,
    pub queue: Arc<WorkQueue>,
    pub metrics: Arc<ReconcileMetrics>,
    pub pool: Arc<WorkerPool<dyn ResourceStore>>,
    pub ready: Arc<AtomicBool>,
}

impl OperatorRuntime {
    pub fn new(config: OperatorConfig) -> Result<Self, RuntimeError> {
        Self::with_catalog(config, RulesetCatalog::mvp_v1())
    }

    pub fn with_catalog(
        config: OperatorConfig,
        catalog: RulesetCatalog,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let store = Arc::new(InMemoryResourceStore::new_in_memory());
        let dyn_store: Arc<dyn ResourceStore> = store.clone();
        let controller = RunController::new(
            config.run_controller_config(),
            dyn_store,
            catalog,
            Arc::new(SystemClock),
        )?;
        let queue = WorkQueue::new(config.rate_limiter_config());
        let metrics = Arc::new(ReconcileMetrics::new()?);
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::new(controller),
            Arc::clone(&metrics),
            config.reconciliation_timeout(),
        ));
        Ok(Self {
            config,
            store,
            queue,
            metrics,
            pool,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            queue: Arc::clone(&self.queue),
            metrics: Arc::clone(&self.metrics),
            ready: Arc::clone(&self.ready),
        }
    }
}
