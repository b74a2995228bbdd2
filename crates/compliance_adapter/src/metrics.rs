#![forbid(unsafe_code)]

//! Prometheus counters for the reconcile loop, served on the metrics listener.

use compliance_os::run_controller::ReconcileOutcome;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

const OUTCOME_LABEL: &str = "outcome";
const OUTCOME_COMPLETED: &str = "completed";
const OUTCOME_FAILED: &str = "failed";
const OUTCOME_NOOP: &str = "noop";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Reconcile counters registered on a private registry.
///
/// Outcomes share one family labelled by `outcome`; every label value is
/// initialised at zero so scrapes see the full set before the first run.
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    reconciles_total: IntCounter,
    errors_total: IntCounter,
    requeues_total: IntCounter,
    outcomes_total: IntCounterVec,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileMetricsSnapshot {
    pub reconciles_total: u64,
    pub errors_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub noop_total: u64,
    pub requeues_total: u64,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let reconciles_total = IntCounter::new(
            "compliance_run_reconciles_total",
            "Reconcile invocations.",
        )?;
        registry.register(Box::new(reconciles_total.clone()))?;

        let errors_total = IntCounter::new(
            "compliance_run_reconcile_errors_total",
            "Reconciles that returned an error.",
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let requeues_total =
            IntCounter::new("compliance_run_requeues_total", "Rate-limited requeues.")?;
        registry.register(Box::new(requeues_total.clone()))?;

        let outcomes_total = IntCounterVec::new(
            Opts::new(
                "compliance_run_outcomes_total",
                "Reconciles that finished without error, by outcome.",
            ),
            &[OUTCOME_LABEL],
        )?;
        registry.register(Box::new(outcomes_total.clone()))?;
        for outcome in [OUTCOME_COMPLETED, OUTCOME_FAILED, OUTCOME_NOOP] {
            outcomes_total.with_label_values(&[outcome]);
        }

        Ok(Self {
            registry,
            reconciles_total,
            errors_total,
            requeues_total,
            outcomes_total,
        })
    }

    pub fn record_outcome(&self, outcome: &ReconcileOutcome) {
        self.reconciles_total.inc();
        let label = match outcome {
            ReconcileOutcome::Completed { .. } => OUTCOME_COMPLETED,
            ReconcileOutcome::Failed { .. } => OUTCOME_FAILED,
            ReconcileOutcome::NotFound | ReconcileOutcome::AlreadyProcessed(_) => OUTCOME_NOOP,
        };
        self.outcomes_total.with_label_values(&[label]).inc();
    }

    pub fn record_error(&self) {
        self.reconciles_total.inc();
        self.errors_total.inc();
    }

    pub fn record_requeue(&self) {
        self.requeues_total.inc();
    }

    pub fn snapshot(&self) -> ReconcileMetricsSnapshot {
        let outcome = |label: &str| self.outcomes_total.with_label_values(&[label]).get();
        ReconcileMetricsSnapshot {
            reconciles_total: self.reconciles_total.get(),
            errors_total: self.errors_total.get(),
            completed_total: outcome(OUTCOME_COMPLETED),
            failed_total: outcome(OUTCOME_FAILED),
            noop_total: outcome(OUTCOME_NOOP),
            requeues_total: self.requeues_total.get(),
        }
    }

    /// Prometheus text exposition of every registered family.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}
