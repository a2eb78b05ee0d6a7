use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::machine_set::MachineTemplateSpec;

/// MachineDeployment declares a desired count of interchangeable machines at
/// a given template revision and rolls the fleet between revisions.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "rullaus.io",
    version = "v1alpha1",
    kind = "MachineDeployment",
    namespaced,
    status = "MachineDeploymentStatus",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Updated", "type":"integer", "jsonPath":".status.updatedReplicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    /// Number of desired machines. Defaulted to 1 when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label selector for the machine sets (and machines) owned by this
    /// deployment. Must be non-empty and match the template labels.
    pub selector: LabelSelector,

    /// Template describing the machines that will be created.
    pub template: MachineTemplateSpec,

    /// How to replace existing machines with new ones.
    #[serde(default)]
    pub strategy: MachineDeploymentStrategy,

    /// Minimum number of seconds a machine must be ready (without failing)
    /// before it is counted as available. Consumed by the machine-set
    /// controller. Defaulted to 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,

    /// Number of drained old machine sets to retain for rollback.
    /// Defaulted to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Maximum time in seconds for the rollout to make progress before
    /// collaborators consider it stalled. Defaulted to 600.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_deadline_seconds: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStrategy {
    /// Strategy type. Only RollingUpdate is supported; defaulted when unset.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub strategy_type: Option<MachineDeploymentStrategyType>,

    /// Rolling-update tolerances. Only meaningful for type RollingUpdate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<MachineRollingUpdateDeployment>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum MachineDeploymentStrategyType {
    /// Replace old machine sets by new ones gradually, scaling both so that
    /// availability never drops below `replicas - maxUnavailable` and total
    /// capacity never exceeds `replicas + maxSurge`.
    RollingUpdate,
}

/// Tolerances for the rolling update.
///
/// Each value is an absolute number (e.g. `5`) or a percentage of the desired
/// replicas (e.g. `"25%"`). The validator rejects configurations where both
/// resolve to zero, since the rollout could then never make progress.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineRollingUpdateDeployment {
    /// Maximum number of machines that can be unavailable during the update.
    /// Percentages are computed against the desired replicas, rounding down
    /// so the availability floor is never relaxed by rounding. Defaulted to 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Maximum number of machines that can be scheduled above the desired
    /// count during the update. Percentages round up so that a nonzero
    /// percentage always permits at least one extra machine. Defaulted to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
}

/// Observed aggregate state, written by the controller after every tick that
/// changes it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Generation of the deployment spec this status was computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Total machines across all owned machine sets.
    #[serde(default)]
    pub replicas: i32,

    /// Machines at the current template revision.
    #[serde(default)]
    pub updated_replicas: i32,

    /// Machines reported ready by their machine set.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines ready for at least minReadySeconds.
    #[serde(default)]
    pub available_replicas: i32,

    /// max(0, desired - available).
    #[serde(default)]
    pub unavailable_replicas: i32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "machine_deployment_test.rs"]
mod tests;
