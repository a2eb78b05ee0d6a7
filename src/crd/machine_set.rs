use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MachineSet owns a group of identical machines at a single template
/// revision. The machine-deployment controller sets its desired replica
/// count; the machine-set controller creates and deletes the machines.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "rullaus.io",
    version = "v1alpha1",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Number of desired machines. Written only by the deployment controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Minimum seconds a machine must be ready before counting as available.
    /// Copied from the owning deployment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ready_seconds: Option<i32>,

    /// Label selector for the machines this set owns.
    pub selector: LabelSelector,

    /// The machine spec stamped out for every replica.
    pub template: MachineTemplateSpec,
}

/// Observed counts reported by the machine-set controller. Monotonically
/// consistent: `available <= ready <= replicas`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines ready for at least minReadySeconds.
    #[serde(default)]
    pub available_replicas: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Template for the machines a set stamps out. Labels on the template
/// identify the machines to the selector; the spec is handed to the
/// infrastructure provider untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MachineTemplateSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<MachineSpec>,
}

/// Opaque machine description. Two deployments with byte-equal specs produce
/// interchangeable machines; equality of this struct (modulo controller-owned
/// labels) is what defines "new set" versus "old set".
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Named machine class resolved by the provider (instance size, image).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_class: Option<String>,

    /// Software versions to provision on the machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<MachineVersionInfo>,

    /// Raw provider-specific configuration, passed through uninterpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_spec: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineVersionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "machine_set_test.rs"]
mod tests;
