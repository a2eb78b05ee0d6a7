use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use rullaus::controller::store::KubeStore;
use rullaus::controller::{reconcile, Context, ReconcileError};
use rullaus::crd::machine_deployment::MachineDeployment;
use rullaus::crd::machine_set::MachineSet;
use rullaus::server::{
    create_metrics, run_health_server, shutdown_pair, wait_for_signal, ReadinessState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Default port for the health and metrics endpoints
const DEFAULT_HEALTH_PORT: u16 = 8080;

fn health_port() -> u16 {
    std::env::var("RULLAUS_HEALTH_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HEALTH_PORT)
}

/// Error policy for the controller: re-queue with a fixed delay.
///
/// kube-runtime layers exponential backoff on repeated failures, which is the
/// only retry mechanism; the reconciler never retries internally.
pub fn error_policy(
    md: Arc<MachineDeployment>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    warn!(
        machine_deployment = %md.name_any(),
        "reconcile error (will retry): {error:?}"
    );
    Action::requeue(Duration::from_secs(10))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting rullaus machine-fleet rolling-update controller");

    let readiness = ReadinessState::new();
    let metrics = create_metrics().map_err(|e| anyhow::anyhow!("metrics registry: {e}"))?;

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("connected to Kubernetes cluster");

    let store = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(store, Some(metrics.clone())));

    let (shutdown, shutdown_listener) = shutdown_pair();
    let health_handle = tokio::spawn(run_health_server(
        health_port(),
        readiness.clone(),
        metrics,
        shutdown_listener,
    ));

    let deployments = Api::<MachineDeployment>::all(client.clone());
    let machine_sets = Api::<MachineSet>::all(client);

    readiness.set_ready();
    info!("controller ready, starting reconciliation loop");

    // Owning the MachineSet watch re-triggers the parent on child changes, so
    // the level-triggered loop converges without polling.
    let controller = Controller::new(deployments, watcher::Config::default())
        .owns(machine_sets, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            if let Ok(obj) = result {
                info!("reconciled: {obj:?}");
            }
            // Errors are already logged in error_policy
        });

    tokio::select! {
        _ = controller => {
            info!("controller stream ended");
        }
        signal = wait_for_signal() => {
            info!(signal, "initiating graceful shutdown");
            // Flip readiness first so Kubernetes stops routing to this pod
            readiness.set_not_ready();
        }
    }

    shutdown.trigger();
    match health_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "health server exited with error"),
        Err(e) => warn!(error = %e, "health server task failed"),
    }

    info!("rullaus controller shut down");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
