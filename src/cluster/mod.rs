//! Cluster control plane access
//!
//! [`ClusterApi`] lists the verbs the operator needs from the cluster. The
//! production implementation is [`KubeCluster`]; tests use an in-memory fake.

mod kube_client;

#[cfg(test)]
pub(crate) mod fake;

pub use kube_client::KubeCluster;

use crate::error::Result;
use crate::model::{RestoreHint, WorkloadRef, WorkloadResource};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Control-plane verbs used by the inventory and the orchestrator
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Every replica and daemon workload in `namespace`, with restore hints decoded.
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadResource>>;

    /// Fresh read of one workload. `NotFound` if it has vanished.
    async fn get_workload(&self, workload: &WorkloadRef) -> Result<WorkloadResource>;

    /// Set the replica count through the scale subresource.
    async fn scale_replicas(&self, workload: &WorkloadRef, replicas: i32) -> Result<()>;

    /// Store a restore hint on the workload.
    async fn annotate_restore_hint(&self, workload: &WorkloadRef, hint: &RestoreHint) -> Result<()>;

    /// Replace a daemon's pod node selector in one write. The restore-hint
    /// annotation is set to `hint`, or removed when `hint` is `None`.
    async fn apply_placement(
        &self,
        workload: &WorkloadRef,
        node_selector: Option<BTreeMap<String, String>>,
        hint: Option<&RestoreHint>,
    ) -> Result<()>;
}
