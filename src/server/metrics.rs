//! Prometheus self-metrics for the controller.
//!
//! These describe the controller itself (tick counts, durations, replica
//! writes), not the fleets it manages; fleet state lives in the deployment
//! status.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    machine_sets_scaled: IntCounterVec,
}

/// Build the metrics registry. Called once at startup.
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let reconciliations = IntCounterVec::new(
        Opts::new(
            "rullaus_reconciliations_total",
            "Reconciliation ticks by outcome",
        ),
        &["outcome"],
    )?;
    let reconcile_duration = HistogramVec::new(
        HistogramOpts::new(
            "rullaus_reconcile_duration_seconds",
            "Reconciliation tick duration in seconds",
        ),
        &["outcome"],
    )?;
    let machine_sets_scaled = IntCounterVec::new(
        Opts::new(
            "rullaus_machine_sets_scaled_total",
            "Machine-set replica-count writes by direction",
        ),
        &["direction"],
    )?;

    registry.register(Box::new(reconciliations.clone()))?;
    registry.register(Box::new(reconcile_duration.clone()))?;
    registry.register(Box::new(machine_sets_scaled.clone()))?;

    Ok(Arc::new(ControllerMetrics {
        registry,
        reconciliations,
        reconcile_duration,
        machine_sets_scaled,
    }))
}

impl ControllerMetrics {
    pub fn record_reconciliation(&self, outcome: &str, duration_secs: f64) {
        self.reconciliations.with_label_values(&[outcome]).inc();
        self.reconcile_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_machine_set_scaled(&self, direction: &str) {
        self.machine_sets_scaled
            .with_label_values(&[direction])
            .inc();
    }

    /// Encode all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
