//! Workload inventory
//!
//! Enumerates the replica and daemon workloads of a namespace. Results are
//! read from the cluster on every call.

use crate::cluster::ClusterApi;
use crate::error::{OperatorError, Result};
use crate::model::WorkloadResource;
use std::sync::Arc;
use tracing::debug;

/// Read-only view of the workloads in tenant namespaces
#[derive(Clone)]
pub struct WorkloadInventory {
    cluster: Arc<dyn ClusterApi>,
}

impl WorkloadInventory {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// List every workload in `namespace`.
    ///
    /// Fails with `NotFound` when the namespace does not exist. An existing
    /// namespace without workloads yields an empty list.
    pub async fn list(&self, namespace: &str) -> Result<Vec<WorkloadResource>> {
        if !self.cluster.namespace_exists(namespace).await? {
            return Err(OperatorError::NotFound(format!("namespace {}", namespace)));
        }
        let workloads = self.cluster.list_workloads(namespace).await?;
        debug!(namespace = %namespace, count = workloads.len(), "Inventory listed");
        Ok(workloads)
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        self.cluster.namespace_exists(namespace).await
    }

    pub async fn namespaces(&self) -> Result<Vec<String>> {
        self.cluster.list_namespaces().await
    }

    pub(crate) fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }
}
