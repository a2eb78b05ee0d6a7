//! Splitting owned machine sets into the new set and the old sets.
//!
//! The set whose template matches the deployment template is the new set;
//! everything else is old and will be drained. Revisions are monotonic
//! integers carried in an annotation; the maximum across owned sets
//! identifies the current rollout target.

use super::machine_set::{build_machine_set, template_matches};
use super::reconcile::{Context, ReconcileError};
use crate::crd::machine_deployment::MachineDeployment;
use crate::crd::machine_set::MachineSet;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::info;

/// Annotation carrying the template revision of a machine set. Stable across
/// controller versions.
pub const REVISION_ANNOTATION: &str = "machinedeployments.rullaus.io/revision";

/// Revision recorded on a machine set; 0 when absent or unparseable.
pub fn machine_set_revision(ms: &MachineSet) -> i64 {
    ms.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn max_revision(sets: &[MachineSet]) -> i64 {
    sets.iter().map(machine_set_revision).max().unwrap_or(0)
}

/// Sort key for deterministic planning: creation timestamp ascending, then
/// name. The only tiebreaker the planners rely on, so a replayed tick over
/// the same observed state produces a bit-identical plan.
pub(crate) fn creation_order_key(ms: &MachineSet) -> (Option<DateTime<Utc>>, String) {
    (
        ms.metadata.creation_timestamp.as_ref().map(|t| t.0),
        ms.name_any(),
    )
}

/// Find the owned set whose template matches the deployment template.
///
/// When several match (a rollback re-created the template of an existing
/// set), the highest revision wins, then the oldest set.
pub fn find_new_machine_set<'a>(
    md: &MachineDeployment,
    sets: &'a [MachineSet],
) -> Option<&'a MachineSet> {
    let mut candidates: Vec<&MachineSet> = sets
        .iter()
        .filter(|ms| template_matches(&md.spec.template, &ms.spec.template))
        .collect();
    candidates.sort_by(|a, b| {
        machine_set_revision(b)
            .cmp(&machine_set_revision(a))
            .then_with(|| creation_order_key(a).cmp(&creation_order_key(b)))
    });
    candidates.first().copied()
}

/// Partition the owned sets into `(new, old)` for this tick.
///
/// When no set matches the deployment template, a fresh zero-replica set is
/// built at revision `1 + max(revisions)` and persisted before planning
/// continues. When the winner's revision trails the old sets' maximum (a
/// rollback re-selected an older set), its annotation is re-stamped so
/// max-revision selection stays stable on later ticks.
pub async fn select_machine_sets(
    ctx: &Context,
    md: &MachineDeployment,
    sets: &[MachineSet],
) -> Result<(MachineSet, Vec<MachineSet>), ReconcileError> {
    let new_set = find_new_machine_set(md, sets);
    let old_sets: Vec<MachineSet> = sets
        .iter()
        .filter(|ms| match new_set {
            Some(winner) => ms.metadata.name != winner.metadata.name,
            None => true,
        })
        .cloned()
        .collect();

    match new_set {
        Some(winner) => {
            let needed = max_revision(&old_sets) + 1;
            let current = machine_set_revision(winner);
            if current < needed {
                let mut stamped = winner.clone();
                stamped
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(REVISION_ANNOTATION.to_string(), needed.to_string());
                let updated = ctx.store.update_machine_set(&stamped).await?;
                info!(
                    machine_set = %updated.name_any(),
                    from = current,
                    to = needed,
                    "re-stamped machine set revision"
                );
                Ok((updated, old_sets))
            } else {
                Ok((winner.clone(), old_sets))
            }
        }
        None => {
            let revision = max_revision(sets) + 1;
            let fresh = build_machine_set(md, revision)?;
            let created = ctx.store.create_machine_set(&fresh).await?;
            info!(
                machine_deployment = %md.name_any(),
                machine_set = %created.name_any(),
                revision,
                "created machine set for new template revision"
            );
            Ok((created, old_sets))
        }
    }
}
