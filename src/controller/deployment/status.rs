//! Status aggregation and end-of-rollout cleanup.

use super::machine_set::machine_set_replicas;
use super::reconcile::{Context, ReconcileError};
use super::revision::machine_set_revision;
use crate::crd::machine_deployment::{MachineDeployment, MachineDeploymentStatus};
use crate::crd::machine_set::MachineSet;
use kube::ResourceExt;
use tracing::{debug, info};

/// Aggregate child counts into the deployment status.
///
/// `updated` is what the new set observes; everything else is a sum over all
/// owned sets.
pub fn calculate_status(
    md: &MachineDeployment,
    new_set: &MachineSet,
    all_sets: &[MachineSet],
) -> MachineDeploymentStatus {
    let desired = md.spec.replicas.unwrap_or(0);
    let mut status = MachineDeploymentStatus {
        observed_generation: md.metadata.generation,
        updated_replicas: new_set.status.as_ref().map(|s| s.replicas).unwrap_or(0),
        ..Default::default()
    };

    for ms in all_sets {
        if let Some(observed) = &ms.status {
            status.replicas += observed.replicas;
            status.ready_replicas += observed.ready_replicas;
            status.available_replicas += observed.available_replicas;
        }
    }
    status.unavailable_replicas = (desired - status.available_replicas).max(0);

    status
}

/// Write the aggregated status iff it differs from what is recorded.
pub async fn ensure_status(
    ctx: &Context,
    md: &MachineDeployment,
    status: &MachineDeploymentStatus,
) -> Result<(), ReconcileError> {
    if md.status.as_ref() == Some(status) {
        return Ok(());
    }
    ctx.store.update_deployment_status(md, status).await?;
    debug!(machine_deployment = %md.name_any(), "updated deployment status");
    Ok(())
}

/// Whether the rollout has fully converged: every machine updated and
/// available, the observed generation caught up, and no old set still asking
/// for machines.
pub fn deployment_complete(
    md: &MachineDeployment,
    status: &MachineDeploymentStatus,
    old_sets: &[MachineSet],
) -> bool {
    let desired = md.spec.replicas.unwrap_or(0);
    status.updated_replicas == desired
        && status.available_replicas == desired
        && status.observed_generation.unwrap_or(0) >= md.metadata.generation.unwrap_or(0)
        && old_sets
            .iter()
            .all(|ms| ms.spec.replicas.unwrap_or(0) == 0)
}

/// Cleanup hook, invoked once the rollout is complete: delete drained old
/// sets beyond the revision history limit, oldest revisions first.
///
/// A set is drained only when both its desired and observed counts are zero;
/// anything still winding down is kept. Not-found during delete is ignored.
pub async fn cleanup_deployment(
    ctx: &Context,
    old_sets: &[MachineSet],
    md: &MachineDeployment,
) -> Result<(), ReconcileError> {
    let limit = md.spec.revision_history_limit.unwrap_or(1).max(0) as usize;

    let mut drained: Vec<&MachineSet> = old_sets
        .iter()
        .filter(|ms| {
            machine_set_replicas(ms).unwrap_or(0) == 0
                && ms.status.as_ref().map(|s| s.replicas).unwrap_or(0) == 0
        })
        .collect();
    if drained.len() <= limit {
        return Ok(());
    }

    drained.sort_by_key(|ms| machine_set_revision(ms));
    let excess = drained.len() - limit;
    for ms in drained.into_iter().take(excess) {
        match ctx.store.delete_machine_set(ms).await {
            Ok(()) => info!(
                machine_deployment = %md.name_any(),
                machine_set = %ms.name_any(),
                "deleted machine set beyond revision history limit"
            ),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
