//! Object-store access for the controller.
//!
//! Every read and write of machine sets and deployment status goes through
//! the [`ObjectStore`] trait so the planners can be exercised against an
//! in-memory store in tests. The production implementation talks to the
//! Kubernetes API server; writes are optimistic (resourceVersion) and
//! conflicts surface as retriable errors for the work queue.

use crate::crd::machine_deployment::{MachineDeployment, MachineDeploymentStatus};
use crate::crd::machine_set::MachineSet;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency conflict (stale read). Retriable: the work
    /// queue re-queues the tick and the next one re-observes.
    #[error("conflict writing {0}")]
    Conflict(String),

    /// The object vanished between observation and write.
    #[error("{0} not found")]
    NotFound(String),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("object is missing required metadata: {0}")]
    MissingMetadata(&'static str),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

fn classify(object: String, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 409 => StoreError::Conflict(object),
        kube::Error::Api(ref resp) if resp.code == 404 => StoreError::NotFound(object),
        other => StoreError::Api(other),
    }
}

/// Persistence operations required by the rollout orchestrator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List the machine sets owned by this deployment: selector match plus a
    /// controller owner-reference check.
    async fn list_machine_sets(
        &self,
        md: &MachineDeployment,
    ) -> Result<Vec<MachineSet>, StoreError>;

    async fn create_machine_set(&self, ms: &MachineSet) -> Result<MachineSet, StoreError>;

    /// Replace the machine set's spec and metadata, keyed on its
    /// resourceVersion. A stale read comes back as [`StoreError::Conflict`].
    async fn update_machine_set(&self, ms: &MachineSet) -> Result<MachineSet, StoreError>;

    async fn delete_machine_set(&self, ms: &MachineSet) -> Result<(), StoreError>;

    async fn update_deployment_status(
        &self,
        md: &MachineDeployment,
        status: &MachineDeploymentStatus,
    ) -> Result<(), StoreError>;
}

/// Render a LabelSelector as the string form accepted by list requests.
///
/// Supports matchLabels and the four matchExpressions operators; unknown
/// operators are skipped with a warning (the validator rejects them earlier).
pub fn selector_string(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{key}={value}"));
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.as_deref().unwrap_or(&[]).join(",");
            match expr.operator.as_str() {
                "In" => parts.push(format!("{} in ({values})", expr.key)),
                "NotIn" => parts.push(format!("{} notin ({values})", expr.key)),
                "Exists" => parts.push(expr.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", expr.key)),
                other => warn!(operator = other, key = %expr.key, "skipping unknown selector operator"),
            }
        }
    }
    parts.join(",")
}

/// Store backed by the Kubernetes API server.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machine_sets(&self, namespace: &str) -> Api<MachineSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_machine_sets(
        &self,
        md: &MachineDeployment,
    ) -> Result<Vec<MachineSet>, StoreError> {
        let namespace = md
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let uid = md.uid().ok_or(StoreError::MissingMetadata("uid"))?;

        let params = ListParams::default().labels(&selector_string(&md.spec.selector));
        let list = self
            .machine_sets(&namespace)
            .list(&params)
            .await
            .map_err(|e| classify(format!("machine sets of {}", md.name_any()), e))?;

        // The selector can match sets adopted by someone else; ownership is
        // the controller owner reference, not the labels.
        Ok(list
            .items
            .into_iter()
            .filter(|ms| {
                ms.metadata
                    .owner_references
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .any(|or| or.controller == Some(true) && or.uid == uid)
            })
            .collect())
    }

    async fn create_machine_set(&self, ms: &MachineSet) -> Result<MachineSet, StoreError> {
        let namespace = ms
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        self.machine_sets(&namespace)
            .create(&PostParams::default(), ms)
            .await
            .map_err(|e| classify(format!("machine set {}", ms.name_any()), e))
    }

    async fn update_machine_set(&self, ms: &MachineSet) -> Result<MachineSet, StoreError> {
        let namespace = ms
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let name = ms.metadata.name.clone().ok_or(StoreError::MissingMetadata("name"))?;
        self.machine_sets(&namespace)
            .replace(&name, &PostParams::default(), ms)
            .await
            .map_err(|e| classify(format!("machine set {name}"), e))
    }

    async fn delete_machine_set(&self, ms: &MachineSet) -> Result<(), StoreError> {
        let namespace = ms
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let name = ms.metadata.name.clone().ok_or(StoreError::MissingMetadata("name"))?;
        self.machine_sets(&namespace)
            .delete(&name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(format!("machine set {name}"), e))
    }

    async fn update_deployment_status(
        &self,
        md: &MachineDeployment,
        status: &MachineDeploymentStatus,
    ) -> Result<(), StoreError> {
        let namespace = md
            .namespace()
            .ok_or(StoreError::MissingMetadata("namespace"))?;
        let name = md.metadata.name.clone().ok_or(StoreError::MissingMetadata("name"))?;
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), &namespace);
        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await
        .map(|_| ())
        .map_err(|e| classify(format!("machine deployment {name} status"), e))
    }
}
