use crate::controller::store::{ObjectStore, StoreError};
use crate::crd::machine_deployment::MachineDeployment;
use crate::crd::machine_set::MachineSet;
use crate::server::SharedMetrics;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use super::defaulting::defaulted;
use super::revision::select_machine_sets;
use super::rolling::{reconcile_new_machine_set, reconcile_old_machine_sets};
use super::status::{calculate_status, cleanup_deployment, deployment_complete, ensure_status};
use super::validation::validate_machine_deployment;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("machine deployment missing namespace")]
    MissingNamespace,

    #[error("machine deployment missing name")]
    MissingName,

    /// A scalar the defaulter is contractually responsible for was unset.
    #[error("spec replicas for {0} is nil, this is unexpected")]
    MissingReplicas(String),

    #[error("invalid MachineDeployment spec: {0}")]
    ValidationError(String),

    /// The computed plan violated a planner precondition. The tick aborts
    /// with no further writes; already-committed writes are safe because the
    /// next tick re-observes.
    #[error("planning invariant violated: {0}")]
    InvariantViolation(String),

    #[error("failed to serialize machine template: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared state handed to every reconciliation.
pub struct Context {
    /// All reads and writes go through here; optimistic concurrency is the
    /// store's concern.
    pub store: Arc<dyn ObjectStore>,
    /// Controller self-metrics; None in tests that don't assert on them.
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Option<SharedMetrics>) -> Self {
        Context { store, metrics }
    }
}

/// Requeue intervals: converged deployments are revisited lazily, in-flight
/// rollouts promptly. Child watch events re-trigger sooner either way.
const REQUEUE_COMPLETE: Duration = Duration::from_secs(300);
const REQUEUE_PROGRESSING: Duration = Duration::from_secs(5);

/// Reconcile one MachineDeployment (one tick).
///
/// 1. Default and validate the spec
/// 2. List owned machine sets and split them by template revision,
///    synthesising a fresh new set when none matches
/// 3. Scale the new set up under the surge ceiling
/// 4. Scale old sets down under the availability floor
/// 5. Aggregate and write status (iff semantically changed)
/// 6. When the rollout is complete, prune revision history
///
/// Planning is pure over the observed state; writes happen sequentially and
/// a tick aborted between writes is safe to replay.
pub async fn reconcile(
    md: Arc<MachineDeployment>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let start = std::time::Instant::now();

    let namespace = md.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = md.name_any();
    info!(machine_deployment = %name, namespace = %namespace, "reconciling");

    // Defaulting runs first so the both-zero check sees filled tolerances.
    let md = defaulted(&md);
    if let Err(err) = validate_machine_deployment(&md) {
        error!(machine_deployment = %name, error = %err, "spec validation failed");
        return Err(ReconcileError::ValidationError(err));
    }

    match rollout_rolling(&md, &ctx).await {
        Ok(complete) => {
            if let Some(metrics) = &ctx.metrics {
                metrics.record_reconciliation("ok", start.elapsed().as_secs_f64());
            }
            if complete {
                debug!(machine_deployment = %name, "rollout complete");
                Ok(Action::requeue(REQUEUE_COMPLETE))
            } else {
                Ok(Action::requeue(REQUEUE_PROGRESSING))
            }
        }
        Err(ReconcileError::Store(e)) if e.is_not_found() => {
            // The deployment or a child vanished mid-tick; the next watch
            // event re-plans from whatever is left.
            debug!(machine_deployment = %name, error = %e, "object went away mid-tick");
            if let Some(metrics) = &ctx.metrics {
                metrics.record_reconciliation("gone", start.elapsed().as_secs_f64());
            }
            Ok(Action::await_change())
        }
        Err(e) => {
            if let Some(metrics) = &ctx.metrics {
                metrics.record_reconciliation("error", start.elapsed().as_secs_f64());
            }
            Err(e)
        }
    }
}

/// Execute one rolling-update tick. Returns whether the rollout is complete.
async fn rollout_rolling(md: &MachineDeployment, ctx: &Context) -> Result<bool, ReconcileError> {
    let sets = ctx.store.list_machine_sets(md).await?;
    let (new_set, old_sets) = select_machine_sets(ctx, md, &sets).await?;

    // The scale-down gate budgets against the fleet as observed at the top
    // of the tick; capacity the scale-up write claims below must not widen it.
    let observed_sets = with_new_set(&old_sets, &new_set);

    // Scale up first so the new set claims surge budget before any drain.
    let new_set = reconcile_new_machine_set(ctx, &observed_sets, &new_set, md).await?;

    let old_sets = reconcile_old_machine_sets(ctx, &observed_sets, old_sets, &new_set, md).await?;

    let all_sets = with_new_set(&old_sets, &new_set);
    let status = calculate_status(md, &new_set, &all_sets);
    let complete = deployment_complete(md, &status, &old_sets);
    ensure_status(ctx, md, &status).await?;

    if complete {
        cleanup_deployment(ctx, &old_sets, md).await?;
    }

    Ok(complete)
}

fn with_new_set(old_sets: &[MachineSet], new_set: &MachineSet) -> Vec<MachineSet> {
    let mut all = old_sets.to_vec();
    all.push(new_set.clone());
    all
}
