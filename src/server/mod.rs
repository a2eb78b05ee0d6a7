//! HTTP server for health and metrics endpoints, plus graceful shutdown.
//!
//! Kubernetes probes:
//! - `/healthz` - liveness (process is running)
//! - `/readyz` - readiness (controller is initialised)
//! - `/metrics` - Prometheus text format

mod health;
mod metrics;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};
pub use shutdown::{shutdown_pair, wait_for_signal, Shutdown, ShutdownListener};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
