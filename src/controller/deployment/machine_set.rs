use super::reconcile::{Context, ReconcileError};
use super::revision::REVISION_ANNOTATION;
use crate::crd::machine_deployment::MachineDeployment;
use crate::crd::machine_set::{MachineSet, MachineSetSpec, MachineTemplateSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Label carrying the hash of the machine template. Injected by this
/// controller into the set's labels, selector, and template; stripped before
/// comparing templates. Stable across controller versions.
pub const TEMPLATE_HASH_LABEL: &str = "machine-template-hash";

/// Resolve an absolute-or-percentage value against a total.
///
/// Absolute integers pass through. Percentages are computed against `total`;
/// `round_up` picks the rounding direction (surge rounds up, unavailability
/// rounds down). Malformed strings resolve to 0; the validator rejects them
/// before the planners ever see one.
pub fn resolve_int_or_percent(value: &IntOrString, total: i32, round_up: bool) -> i32 {
    match value {
        IntOrString::Int(i) => *i,
        IntOrString::String(s) => {
            let Some(percent_str) = s.strip_suffix('%') else {
                return 0;
            };
            match percent_str.parse::<i32>() {
                Ok(percent) if percent >= 0 => {
                    if round_up {
                        ((total as f64 * percent as f64) / 100.0).ceil() as i32
                    } else {
                        total * percent / 100
                    }
                }
                _ => 0,
            }
        }
    }
}

/// Resolved surge budget: how many machines may run above the desired count
/// during the rollout.
pub fn max_surge(md: &MachineDeployment) -> i32 {
    let replicas = md.spec.replicas.unwrap_or(0);
    md.spec
        .strategy
        .rolling_update
        .as_ref()
        .and_then(|r| r.max_surge.as_ref())
        .map(|v| resolve_int_or_percent(v, replicas, true))
        .unwrap_or(0)
}

/// Resolved unavailability budget, capped at the desired count so the
/// availability floor never goes negative.
pub fn max_unavailable(md: &MachineDeployment) -> i32 {
    let replicas = md.spec.replicas.unwrap_or(0);
    let resolved = md
        .spec
        .strategy
        .rolling_update
        .as_ref()
        .and_then(|r| r.max_unavailable.as_ref())
        .map(|v| resolve_int_or_percent(v, replicas, false))
        .unwrap_or(0);
    resolved.min(replicas)
}

/// Sum of desired replicas across the given sets.
pub fn total_replicas(sets: &[MachineSet]) -> i32 {
    sets.iter().map(|ms| ms.spec.replicas.unwrap_or(0)).sum()
}

/// Sum of observed available replicas across the given sets.
pub fn total_available_replicas(sets: &[MachineSet]) -> i32 {
    sets.iter().map(available_replicas).sum()
}

pub fn available_replicas(ms: &MachineSet) -> i32 {
    ms.status
        .as_ref()
        .map(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Desired replicas of the deployment. The defaulter fills this before the
/// planners run, so `None` here is a programming error, not user input.
pub fn deployment_replicas(md: &MachineDeployment) -> Result<i32, ReconcileError> {
    md.spec
        .replicas
        .ok_or_else(|| ReconcileError::MissingReplicas(format!("machine deployment {}", md.name_any())))
}

/// Desired replicas of a machine set; same contract as [`deployment_replicas`].
pub fn machine_set_replicas(ms: &MachineSet) -> Result<i32, ReconcileError> {
    ms.spec
        .replicas
        .ok_or_else(|| ReconcileError::MissingReplicas(format!("machine set {}", ms.name_any())))
}

/// Compute a stable 10-character hash for a machine template.
///
/// FNV-1a over the JSON encoding: deterministic across processes (unlike
/// SipHash) so the hash label survives controller restarts and upgrades.
pub fn compute_machine_template_hash(
    template: &MachineTemplateSpec,
) -> Result<String, ReconcileError> {
    let json = serde_json::to_string(template)
        .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;

    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in json.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }

    Ok(format!("{hash:016x}")[..10].to_string())
}

/// Template equality used to split sets into new versus old.
///
/// The controller injects [`TEMPLATE_HASH_LABEL`] itself, so it is stripped
/// from both sides before comparing; everything else must match structurally.
pub fn template_matches(lhs: &MachineTemplateSpec, rhs: &MachineTemplateSpec) -> bool {
    strip_hash_label(lhs) == strip_hash_label(rhs)
}

fn strip_hash_label(template: &MachineTemplateSpec) -> MachineTemplateSpec {
    let mut template = template.clone();
    if let Some(meta) = template.metadata.as_mut() {
        if let Some(labels) = meta.labels.as_mut() {
            labels.remove(TEMPLATE_HASH_LABEL);
            if labels.is_empty() {
                meta.labels = None;
            }
        }
    }
    template
}

/// Build a fresh machine set for the deployment's current template.
///
/// The set starts at zero replicas; the scale-up planner grows it under the
/// surge ceiling. Name is `{deployment}-{template-hash}`, labels and selector
/// gain the hash label, and the revision annotation records `revision`.
pub fn build_machine_set(
    md: &MachineDeployment,
    revision: i64,
) -> Result<MachineSet, ReconcileError> {
    let md_name = md.metadata.name.as_ref().ok_or(ReconcileError::MissingName)?;
    let hash = compute_machine_template_hash(&md.spec.template)?;

    let mut template = md.spec.template.clone();
    let mut labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    labels.insert(TEMPLATE_HASH_LABEL.to_string(), hash.clone());

    let mut template_metadata = template.metadata.take().unwrap_or_default();
    template_metadata.labels = Some(labels.clone());
    template.metadata = Some(template_metadata);

    let mut selector = md.spec.selector.clone();
    selector
        .match_labels
        .get_or_insert_with(Default::default)
        .insert(TEMPLATE_HASH_LABEL.to_string(), hash.clone());

    let owner_ref = md
        .controller_owner_ref(&())
        .ok_or(ReconcileError::MissingName)?;

    Ok(MachineSet {
        metadata: ObjectMeta {
            name: Some(format!("{md_name}-{hash}")),
            namespace: md.metadata.namespace.clone(),
            labels: Some(labels),
            annotations: Some(
                [(REVISION_ANNOTATION.to_string(), revision.to_string())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas: Some(0),
            min_ready_seconds: md.spec.min_ready_seconds,
            selector,
            template,
        },
        status: None,
    })
}

/// Write a desired replica count to a machine set, if it differs.
///
/// Equality short-circuits without touching the store, which is what bounds
/// the controller to at most one replica-count write per set per tick.
pub async fn scale_machine_set(
    ctx: &Context,
    ms: &MachineSet,
    replicas: i32,
    md: &MachineDeployment,
) -> Result<MachineSet, ReconcileError> {
    let current = machine_set_replicas(ms)?;
    if current == replicas {
        debug!(machine_set = %ms.name_any(), replicas, "machine set already at desired scale");
        return Ok(ms.clone());
    }

    let mut desired = ms.clone();
    desired.spec.replicas = Some(replicas);
    let updated = ctx.store.update_machine_set(&desired).await?;

    info!(
        machine_deployment = %md.name_any(),
        machine_set = %updated.name_any(),
        from = current,
        to = replicas,
        "scaled machine set"
    );
    if let Some(metrics) = &ctx.metrics {
        metrics.record_machine_set_scaled(if replicas > current { "up" } else { "down" });
    }

    Ok(updated)
}
