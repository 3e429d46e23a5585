//! Scaling orchestrator
//!
//! Drives every workload in a namespace toward a target replica count:
//!
//! - **Replica workloads** are scaled through their scale subresource. The
//!   running size is stored as a restore hint before scaling to zero and
//!   restored on the next start, whatever count the start asked for.
//! - **Daemon workloads** have no replica count. Stopping swaps their node
//!   selector for one no node satisfies (saving the original); starting puts
//!   the saved selector back.
//!
//! A namespace scale is a best-effort batch: a failing workload is reported
//! in its own result entry and the remaining workloads are still processed.

use super::inventory::WorkloadInventory;
use crate::annotations;
use crate::error::{OperatorError, Result};
use crate::model::{RestoreHint, WorkloadKind, WorkloadResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome for a single workload
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleOutcome {
    pub resource: String,
    pub kind: WorkloadKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Replica count actually applied (replica workloads only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_replicas: Option<i32>,
}

/// Result of a namespace scale
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleReport {
    pub namespace: String,
    pub target_replicas: i32,
    pub total_resources: usize,
    pub results: Vec<ScaleOutcome>,
}

impl ScaleReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Some workloads failed while the call as a whole went through.
    pub fn is_partial_failure(&self) -> bool {
        self.failed() > 0
    }

    /// Sum of the replica counts applied to replica workloads that succeeded,
    /// or `None` when no replica workload succeeded.
    pub fn applied_replica_total(&self) -> Option<i32> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.applied_replicas)
            .fold(None, |acc, n| Some(acc.unwrap_or(0) + n))
    }

    /// Names of the workloads that failed, with their errors.
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| format!("{}: {}", r.resource, r.error.as_deref().unwrap_or("unknown error")))
            .collect()
    }
}

/// Namespace-wide scaler
pub struct ScalingOrchestrator {
    inventory: WorkloadInventory,
    /// One lock per namespace with a scale in flight or waiting; scales of
    /// the same namespace run one at a time
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScalingOrchestrator {
    pub fn new(inventory: WorkloadInventory) -> Self {
        Self {
            inventory,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn inventory(&self) -> &WorkloadInventory {
        &self.inventory
    }

    async fn namespace_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other scale holds or waits on `lock`.
    async fn release_namespace_lock(&self, namespace: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // the map and `lock` are the only references left
        if Arc::strong_count(&lock) == 2 {
            locks.remove(namespace);
        }
    }

    /// Scale every workload in `namespace` toward `target_replicas`.
    ///
    /// Only a missing namespace (or a failure listing it) is returned as an
    /// error; per-workload failures are recorded in the report.
    pub async fn scale_namespace(&self, namespace: &str, target_replicas: i32) -> Result<ScaleReport> {
        if target_replicas < 0 {
            return Err(OperatorError::Validation(format!(
                "replica count must not be negative, got {}",
                target_replicas
            )));
        }

        let lock = self.namespace_lock(namespace).await;
        let report = {
            let _guard = lock.lock().await;
            self.scale_locked(namespace, target_replicas).await
        };
        self.release_namespace_lock(namespace, lock).await;
        report
    }

    async fn scale_locked(&self, namespace: &str, target_replicas: i32) -> Result<ScaleReport> {
        let workloads = self.inventory.list(namespace).await?;
        info!(
            namespace = %namespace,
            target_replicas,
            resources = workloads.len(),
            "Scaling namespace"
        );

        let mut results = Vec::with_capacity(workloads.len());
        for workload in &workloads {
            let outcome = if workload.kind.is_replica_controlled() {
                self.scale_replica_workload(workload, target_replicas)
                    .await
                    .map(Some)
            } else {
                self.scale_daemon_workload(workload, target_replicas)
                    .await
                    .map(|_| None)
            };

            results.push(match outcome {
                Ok(applied_replicas) => ScaleOutcome {
                    resource: workload.name.clone(),
                    kind: workload.kind,
                    success: true,
                    error: None,
                    applied_replicas,
                },
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        resource = %workload.name,
                        kind = %workload.kind,
                        error = %e,
                        "Failed to scale workload"
                    );
                    ScaleOutcome {
                        resource: workload.name.clone(),
                        kind: workload.kind,
                        success: false,
                        error: Some(e.to_string()),
                        applied_replicas: None,
                    }
                }
            });
        }

        let report = ScaleReport {
            namespace: namespace.to_string(),
            target_replicas,
            total_resources: workloads.len(),
            results,
        };
        info!(
            namespace = %namespace,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Namespace scale finished"
        );
        Ok(report)
    }

    /// Returns the replica count applied.
    async fn scale_replica_workload(&self, workload: &WorkloadResource, target: i32) -> Result<i32> {
        let cluster = self.inventory.cluster();
        let reference = workload.reference();
        let current = cluster.get_workload(&reference).await?;

        let mut applied = target;
        if target == 0 {
            if current.declared_replicas > 0 {
                cluster
                    .annotate_restore_hint(&reference, &RestoreHint::ReplicaCount(current.declared_replicas))
                    .await?;
            }
        } else if current.declared_replicas == 0 {
            if let Some(stored) = current.stored_replica_count().filter(|n| *n > 0) {
                debug!(
                    resource = %reference,
                    requested = target,
                    restored = stored,
                    "Restoring stored replica count"
                );
                applied = stored;
            }
        }

        cluster.scale_replicas(&reference, applied).await?;
        Ok(applied)
    }

    async fn scale_daemon_workload(&self, workload: &WorkloadResource, target: i32) -> Result<()> {
        let cluster = self.inventory.cluster();
        let reference = workload.reference();
        let current = cluster.get_workload(&reference).await?;

        if target == 0 {
            let hint = match &current.restore_hint {
                // already stopped: keep the selector saved by the first stop
                Some(hint @ RestoreHint::PlacementSelector(_)) if current.is_stopped => hint.clone(),
                _ => RestoreHint::PlacementSelector(
                    annotations::without_stop_marker(current.node_selector.as_ref()).unwrap_or_default(),
                ),
            };
            cluster
                .apply_placement(&reference, Some(annotations::stop_selector()), Some(&hint))
                .await
        } else {
            let selector = match &current.restore_hint {
                Some(RestoreHint::PlacementSelector(saved)) if saved.is_empty() => None,
                Some(RestoreHint::PlacementSelector(saved)) => Some(saved.clone()),
                _ => annotations::without_stop_marker(current.node_selector.as_ref()),
            };
            cluster.apply_placement(&reference, selector, None).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{stop_selector, STOP_SELECTOR_KEY};
    use crate::cluster::fake::FakeCluster;
    use std::collections::BTreeMap;

    fn orchestrator(cluster: &Arc<FakeCluster>) -> ScalingOrchestrator {
        let cluster: Arc<dyn crate::cluster::ClusterApi> = cluster.clone();
        ScalingOrchestrator::new(WorkloadInventory::new(cluster))
    }

    fn selector(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_replica_stop_then_start_restores_size() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 4, 4));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 0).await.unwrap();
        let stopped = cluster.workload("acme", "web");
        assert_eq!(stopped.declared_replicas, 0);
        assert_eq!(stopped.restore_hint, Some(RestoreHint::ReplicaCount(4)));

        // the requested count is ignored in favour of the stored one
        let report = orchestrator.scale_namespace("acme", 1).await.unwrap();
        assert_eq!(cluster.workload("acme", "web").declared_replicas, 4);
        assert_eq!(report.results[0].applied_replicas, Some(4));
        assert_eq!(report.applied_replica_total(), Some(4));

        // annotation stays until the next stop overwrites it
        assert_eq!(
            cluster.workload("acme", "web").restore_hint,
            Some(RestoreHint::ReplicaCount(4))
        );
    }

    #[tokio::test]
    async fn test_start_without_hint_uses_target() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("db", "acme", WorkloadKind::StatefulSet, 0, 0));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 2).await.unwrap();
        assert_eq!(cluster.workload("acme", "db").declared_replicas, 2);
    }

    #[tokio::test]
    async fn test_running_workload_is_resized() {
        let cluster = Arc::new(FakeCluster::new());
        let mut web = WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 3, 3);
        web.restore_hint = Some(RestoreHint::ReplicaCount(5));
        cluster.add_workload(web);
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 2).await.unwrap();
        assert_eq!(cluster.workload("acme", "web").declared_replicas, 2);
    }

    #[tokio::test]
    async fn test_stopping_zero_replica_workload_keeps_hint() {
        let cluster = Arc::new(FakeCluster::new());
        let mut web = WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 0, 0);
        web.restore_hint = Some(RestoreHint::ReplicaCount(3));
        cluster.add_workload(web);
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 0).await.unwrap();
        assert_eq!(
            cluster.workload("acme", "web").restore_hint,
            Some(RestoreHint::ReplicaCount(3))
        );
    }

    #[tokio::test]
    async fn test_daemon_without_selector_round_trip() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::daemon("agent", "acme", 3, 3, None));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 0).await.unwrap();
        let stopped = cluster.workload("acme", "agent");
        assert!(stopped.is_stopped);
        assert_eq!(stopped.node_selector, Some(stop_selector()));
        assert_eq!(stopped.restore_hint, Some(RestoreHint::PlacementSelector(BTreeMap::new())));

        orchestrator.scale_namespace("acme", 1).await.unwrap();
        let started = cluster.workload("acme", "agent");
        assert!(!started.is_stopped);
        assert_eq!(started.node_selector, None);
        assert_eq!(started.restore_hint, None);
    }

    #[tokio::test]
    async fn test_daemon_selector_restored_exactly() {
        let cluster = Arc::new(FakeCluster::new());
        let original = selector(&[("disktype", "ssd"), ("zone", "a")]);
        cluster.add_workload(WorkloadResource::daemon("agent", "acme", 3, 3, Some(original.clone())));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 0).await.unwrap();
        orchestrator.scale_namespace("acme", 1).await.unwrap();
        assert_eq!(cluster.workload("acme", "agent").node_selector, Some(original));
    }

    #[tokio::test]
    async fn test_stopping_stopped_daemon_keeps_saved_selector() {
        let cluster = Arc::new(FakeCluster::new());
        let original = selector(&[("zone", "a")]);
        cluster.add_workload(WorkloadResource::daemon("agent", "acme", 3, 3, Some(original.clone())));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 0).await.unwrap();
        orchestrator.scale_namespace("acme", 0).await.unwrap();

        // the replace still runs
        assert_eq!(cluster.placement_writes("agent"), 2);
        assert_eq!(
            cluster.workload("acme", "agent").restore_hint,
            Some(RestoreHint::PlacementSelector(original.clone()))
        );

        orchestrator.scale_namespace("acme", 1).await.unwrap();
        assert_eq!(cluster.workload("acme", "agent").node_selector, Some(original));
    }

    #[tokio::test]
    async fn test_daemon_start_without_hint_drops_marker_only() {
        let cluster = Arc::new(FakeCluster::new());
        let mut held = selector(&[("zone", "a")]);
        held.insert(STOP_SELECTOR_KEY.to_string(), "true".to_string());
        cluster.add_workload(WorkloadResource::daemon("agent", "acme", 0, 0, Some(held)));
        cluster.add_workload(WorkloadResource::daemon("logs", "acme", 0, 0, Some(stop_selector())));
        let orchestrator = orchestrator(&cluster);

        orchestrator.scale_namespace("acme", 1).await.unwrap();
        assert_eq!(
            cluster.workload("acme", "agent").node_selector,
            Some(selector(&[("zone", "a")]))
        );
        assert_eq!(cluster.workload("acme", "logs").node_selector, None);
    }

    #[tokio::test]
    async fn test_partial_failure_continues_batch() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("a", "acme", WorkloadKind::Deployment, 2, 2));
        cluster.add_workload(WorkloadResource::replica("b", "acme", WorkloadKind::Deployment, 2, 2));
        cluster.add_workload(WorkloadResource::replica("c", "acme", WorkloadKind::StatefulSet, 2, 2));
        cluster.fail_workload("b");
        let orchestrator = orchestrator(&cluster);

        let report = orchestrator.scale_namespace("acme", 0).await.unwrap();
        assert_eq!(report.total_resources, 3);
        let status: Vec<(&str, bool)> = report
            .results
            .iter()
            .map(|r| (r.resource.as_str(), r.success))
            .collect();
        assert_eq!(status, vec![("a", true), ("b", false), ("c", true)]);
        assert!(report.is_partial_failure());
        assert!(report.results[1].error.as_deref().unwrap().contains("injected failure"));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(cluster.workload("acme", "c").declared_replicas, 0);
    }

    #[tokio::test]
    async fn test_workload_deleted_after_listing_is_reported() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("a", "acme", WorkloadKind::Deployment, 2, 2));
        cluster.add_workload(WorkloadResource::replica("b", "acme", WorkloadKind::Deployment, 2, 2));
        cluster.vanish_after_list("a");
        let orchestrator = orchestrator(&cluster);

        let report = orchestrator.scale_namespace("acme", 0).await.unwrap();
        assert_eq!(report.total_resources, 2);
        assert!(!report.results[0].success);
        assert!(report.results[0].error.as_deref().unwrap().starts_with("Resource not found"));
        assert!(report.results[1].success);
        assert_eq!(cluster.workload("acme", "b").declared_replicas, 0);
    }

    #[tokio::test]
    async fn test_daemon_failure_in_mixed_batch() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 3, 3));
        cluster.add_workload(WorkloadResource::daemon("agent", "acme", 3, 3, None));
        cluster.add_workload(WorkloadResource::daemon("logs", "acme", 3, 3, None));
        cluster.fail_workload("agent");
        let orchestrator = orchestrator(&cluster);

        let report = orchestrator.scale_namespace("acme", 0).await.unwrap();
        let status: Vec<(&str, bool)> = report
            .results
            .iter()
            .map(|r| (r.resource.as_str(), r.success))
            .collect();
        assert_eq!(status, vec![("web", true), ("agent", false), ("logs", true)]);
        assert_eq!(report.results[1].kind, WorkloadKind::DaemonSet);
        assert_eq!(report.results[1].applied_replicas, None);
        // the failed daemon contributes nothing to the replica total
        assert_eq!(report.applied_replica_total(), Some(0));

        assert!(!cluster.workload("acme", "agent").is_stopped);
        assert!(cluster.workload("acme", "logs").is_stopped);
        assert_eq!(cluster.placement_writes("agent"), 0);
    }

    #[tokio::test]
    async fn test_missing_namespace_raises() {
        let cluster = Arc::new(FakeCluster::new());
        let orchestrator = orchestrator(&cluster);
        assert!(orchestrator.scale_namespace("ghost", 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_namespace_reports_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_namespace("acme");
        let orchestrator = orchestrator(&cluster);

        let report = orchestrator.scale_namespace("acme", 1).await.unwrap();
        assert_eq!(report.total_resources, 0);
        assert_eq!(report.applied_replica_total(), None);
        assert!(!report.is_partial_failure());
    }

    #[tokio::test]
    async fn test_negative_target_rejected() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_namespace("acme");
        let orchestrator = orchestrator(&cluster);
        assert!(matches!(
            orchestrator.scale_namespace("acme", -1).await,
            Err(OperatorError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_stops_keep_original_size() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 3, 3));
        let orchestrator = Arc::new(orchestrator(&cluster));

        let (a, b) = tokio::join!(
            orchestrator.scale_namespace("acme", 0),
            orchestrator.scale_namespace("acme", 0)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(
            cluster.workload("acme", "web").restore_hint,
            Some(RestoreHint::ReplicaCount(3))
        );
    }

    #[tokio::test]
    async fn test_namespace_locks_released_after_scale() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload(WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, 3, 3));
        let orchestrator = Arc::new(orchestrator(&cluster));

        let (a, b) = tokio::join!(
            orchestrator.scale_namespace("acme", 0),
            orchestrator.scale_namespace("acme", 1)
        );
        a.unwrap();
        b.unwrap();
        assert!(orchestrator.scale_namespace("ghost", 0).await.is_err());

        assert!(orchestrator.locks.lock().await.is_empty());
    }
}
