#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use compliance_kernel_contracts::run::RunName;
use compliance_kernel_contracts::Deadline;
use compliance_os::run_controller::{ReconcileOutcome, RunController};
use compliance_storage::ResourceStore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::ReconcileMetrics;
use crate::queue::{QueueError, WorkQueue};

/// Watch events for runs. Only creation starts a reconcile; status writes made by the
/// controller itself surface as updates and must not re-trigger it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Create(RunName),
    Update(RunName),
    Delete(RunName),
    Generic(RunName),
}

impl RunEvent {
    pub fn name(&self) -> &RunName {
        match self {
            RunEvent::Create(n)
            | RunEvent::Update(n)
            | RunEvent::Delete(n)
            | RunEvent::Generic(n) => n,
        }
    }

    pub fn admits_reconcile(&self) -> bool {
        matches!(self, RunEvent::Create(_))
    }
}

/// Returns whether the event enqueued a reconcile.
pub fn enqueue_event(queue: &WorkQueue, event: &RunEvent) -> Result<bool, QueueError> {
    if !event.admits_reconcile() {
        debug!(run = %event.name(), event = ?event, "event filtered");
        return Ok(false);
    }
    queue.add(event.name().as_str())?;
    Ok(true)
}

pub struct WorkerPool<S: ResourceStore + ?Sized + 'static> {
    queue: Arc<WorkQueue>,
    controller: Arc<RunController<S>>,
    metrics: Arc<ReconcileMetrics>,
    reconciliation_timeout: Duration,
}

impl<S: ResourceStore + ?Sized + 'static> WorkerPool<S> {
    pub fn new(
        queue: Arc<WorkQueue>,
        controller: Arc<RunController<S>>,
        metrics: Arc<ReconcileMetrics>,
        reconciliation_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            controller,
            metrics,
            reconciliation_timeout,
        }
    }

    pub fn spawn(self: Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        info!(workers, "starting compliance run workers");
        (0..workers.max(1))
            .map(|worker| {
                let pool = Arc::clone(&self);
                tokio::spawn(async move { pool.run_worker(worker).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize) {
        while let Some(item) = self.queue.get().await {
            self.process(&item).await;
            if let Err(err) = self.queue.done(&item) {
                error!(worker, run = %item, error = %err, "failed to mark item done");
            }
        }
        debug!(worker, "worker stopped");
    }

    /// One reconcile of `item` on a blocking thread, bounded by the reconciliation timeout.
    pub async fn process(&self, item: &str) {
        let name = match RunName::new(item) {
            Ok(name) => name,
            Err(err) => {
                warn!(run = %item, error = %err, "dropping invalid run name");
                self.forget(item);
                return;
            }
        };

        let controller = Arc::clone(&self.controller);
        let deadline = Deadline::after(self.reconciliation_timeout);
        let task_name = name.clone();
        let result =
            tokio::task::spawn_blocking(move || controller.reconcile(&task_name, deadline)).await;

        match result {
            Ok(Ok(outcome)) => {
                self.metrics.record_outcome(&outcome);
                if let ReconcileOutcome::Completed { config_digest, .. } = &outcome {
                    debug!(run = %name, digest = %config_digest, "reconcile completed");
                }
                self.forget(item);
            }
            Ok(Err(err)) => {
                self.metrics.record_error();
                error!(run = %name, error = %err, "reconcile failed");
                self.requeue(item);
            }
            Err(join_err) => {
                self.metrics.record_error();
                error!(run = %name, error = %join_err, "reconcile task aborted");
                self.requeue(item);
            }
        }
    }

    fn forget(&self, item: &str) {
        if let Err(err) = self.queue.forget(item) {
            error!(run = %item, error = %err, "failed to reset requeue count");
        }
    }

    fn requeue(&self, item: &str) {
        match self.queue.add_rate_limited(item) {
            Ok(delay) => {
                self.metrics.record_requeue();
                debug!(run = %item, delay_ms = delay.as_millis() as u64, "requeued");
            }
            Err(err) => warn!(run = %item, error = %err, "requeue dropped"),
        }
    }
}
