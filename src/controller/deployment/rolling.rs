//! The rolling-update decision engine.
//!
//! Scale-up is opportunistic: the new set consumes whatever headroom the
//! surge ceiling leaves over the fleet-wide count, capped at the deployment
//! target. Scale-down is what actually converges the rollout, in two phases
//! with different budgets: unhealthy replicas first (surge-adjusted budget,
//! since deleting them cannot lower availability), then healthy replicas
//! gated on the availability floor. Both phases drain the oldest sets first.

use super::machine_set::{
    available_replicas, deployment_replicas, machine_set_replicas, max_surge, max_unavailable,
    scale_machine_set, total_available_replicas, total_replicas,
};
use super::reconcile::{Context, ReconcileError};
use super::revision::creation_order_key;
use crate::crd::machine_deployment::MachineDeployment;
use crate::crd::machine_set::MachineSet;
use kube::ResourceExt;
use tracing::debug;

/// Bring the new machine set toward the deployment target.
///
/// Already at target: no-op. Above target (the deployment shrank): scale it
/// straight down to the target. Below target: grow it by the available surge
/// headroom.
pub async fn reconcile_new_machine_set(
    ctx: &Context,
    all_sets: &[MachineSet],
    new_set: &MachineSet,
    md: &MachineDeployment,
) -> Result<MachineSet, ReconcileError> {
    let desired = deployment_replicas(md)?;
    let current = machine_set_replicas(new_set)?;

    if current == desired {
        return Ok(new_set.clone());
    }
    if current > desired {
        return scale_machine_set(ctx, new_set, desired, md).await;
    }

    let next = new_machine_set_replicas(md, all_sets, new_set)?;
    scale_machine_set(ctx, new_set, next, md).await
}

/// Next replica count for the new set under the surge ceiling.
///
/// Headroom is what `replicas + maxSurge` leaves over the fleet-wide count;
/// the result never exceeds the deployment target and never falls below the
/// set's current count.
pub fn new_machine_set_replicas(
    md: &MachineDeployment,
    all_sets: &[MachineSet],
    new_set: &MachineSet,
) -> Result<i32, ReconcileError> {
    let desired = deployment_replicas(md)?;
    let current = machine_set_replicas(new_set)?;
    let ceiling = desired + max_surge(md);
    let headroom = (ceiling - total_replicas(all_sets)).max(0);
    Ok((current + headroom).min(desired))
}

/// Drain old machine sets as far as the availability floor allows.
///
/// `all_sets` is the fleet as observed at the top of the tick, before any
/// scale-up write: surge capacity claimed this tick has no available machines
/// yet and must not widen the drain budget. The budget also subtracts the new
/// set's unavailable replicas so they are not counted against the floor
/// twice: while the new set is slow to become ready, draining old capacity on
/// its behalf would push availability below the floor. Phase B recomputes the
/// fleet itself, from the post-cleanup old sets.
pub async fn reconcile_old_machine_sets(
    ctx: &Context,
    all_sets: &[MachineSet],
    old_sets: Vec<MachineSet>,
    new_set: &MachineSet,
    md: &MachineDeployment,
) -> Result<Vec<MachineSet>, ReconcileError> {
    let desired = deployment_replicas(md)?;

    if total_replicas(&old_sets) == 0 {
        // Nothing left to drain.
        return Ok(old_sets);
    }

    let all_count = total_replicas(all_sets);
    let min_available = desired - max_unavailable(md);
    let new_unavailable = machine_set_replicas(new_set)? - available_replicas(new_set);
    let max_scaled_down = all_count - min_available - new_unavailable;
    if max_scaled_down <= 0 {
        return Ok(old_sets);
    }
    debug!(
        machine_deployment = %md.name_any(),
        budget = max_scaled_down,
        "scale-down budget for this tick"
    );

    let (old_sets, cleaned) = cleanup_unhealthy_replicas(ctx, old_sets, md, max_scaled_down).await?;
    debug!(cleaned, "removed unhealthy replicas from old machine sets");

    // Recompute the fleet with the post-cleanup counts before the
    // availability-gated phase.
    let mut all_sets: Vec<MachineSet> = old_sets.clone();
    all_sets.push(new_set.clone());
    let (scaled_down, old_sets) =
        scale_down_old_machine_sets_for_rolling_update(ctx, &all_sets, old_sets, md).await?;
    debug!(scaled_down, "scaled down old machine sets");

    Ok(old_sets)
}

/// Phase A: scale down old-set replicas that are not available.
///
/// These contribute to neither capacity nor availability, so removing them
/// cannot breach the floor; they run against the wider surge-adjusted budget.
/// Oldest sets first.
pub async fn cleanup_unhealthy_replicas(
    ctx: &Context,
    mut old_sets: Vec<MachineSet>,
    md: &MachineDeployment,
    max_cleanup: i32,
) -> Result<(Vec<MachineSet>, i32), ReconcileError> {
    old_sets.sort_by_key(creation_order_key);

    let mut total_scaled_down = 0;
    for ms in old_sets.iter_mut() {
        if total_scaled_down >= max_cleanup {
            break;
        }
        let replicas = machine_set_replicas(ms)?;
        if replicas == 0 {
            // Drained sets are never touched again.
            continue;
        }
        let available = available_replicas(ms);
        if replicas <= available {
            // No unhealthy replicas in this set.
            continue;
        }

        let unhealthy = replicas - available;
        let scale_down = unhealthy.min(max_cleanup - total_scaled_down);
        let next = replicas - scale_down;
        if next > replicas {
            return Err(ReconcileError::InvariantViolation(format!(
                "unhealthy cleanup asked to scale {} up: {replicas} -> {next}",
                ms.name_any()
            )));
        }

        let updated = scale_machine_set(ctx, ms, next, md).await?;
        total_scaled_down += scale_down;
        *ms = updated;
    }

    Ok((old_sets, total_scaled_down))
}

/// Phase B: drain healthy old-set replicas under the availability floor.
///
/// The quota is what current availability leaves above
/// `replicas - maxUnavailable`; once it is spent, remaining old sets wait for
/// a later tick. Oldest sets first.
pub async fn scale_down_old_machine_sets_for_rolling_update(
    ctx: &Context,
    all_sets: &[MachineSet],
    mut old_sets: Vec<MachineSet>,
    md: &MachineDeployment,
) -> Result<(i32, Vec<MachineSet>), ReconcileError> {
    let desired = deployment_replicas(md)?;
    let min_available = desired - max_unavailable(md);
    let available = total_available_replicas(all_sets);
    if available <= min_available {
        // Removing any available replica would breach the floor.
        return Ok((0, old_sets));
    }

    old_sets.sort_by_key(creation_order_key);

    let quota = available - min_available;
    let mut total_scaled_down = 0;
    for ms in old_sets.iter_mut() {
        if total_scaled_down >= quota {
            break;
        }
        let replicas = machine_set_replicas(ms)?;
        if replicas == 0 {
            continue;
        }

        let scale_down = replicas.min(quota - total_scaled_down);
        let next = replicas - scale_down;
        if next > replicas {
            return Err(ReconcileError::InvariantViolation(format!(
                "scale-down asked to scale {} up: {replicas} -> {next}",
                ms.name_any()
            )));
        }

        let updated = scale_machine_set(ctx, ms, next, md).await?;
        total_scaled_down += scale_down;
        *ms = updated;
    }

    Ok((total_scaled_down, old_sets))
}
