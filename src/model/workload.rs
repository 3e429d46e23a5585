//! Workload resources as seen by the inventory and the orchestrator
//!
//! These records are produced fresh from the cluster on every inventory
//! query and are never cached.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of workload found in a tenant namespace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    /// One pod per eligible node, no replica count
    DaemonSet,
}

impl WorkloadKind {
    /// Whether this kind is driven through its replica count (as opposed to
    /// pod placement).
    pub fn is_replica_controlled(&self) -> bool {
        !matches!(self, WorkloadKind::DaemonSet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a workload needs to be returned to its pre-stop shape.
///
/// Carried on the cluster as an annotation; see [`crate::annotations`] for
/// the wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreHint {
    /// Replica count in effect before scaling to zero
    ReplicaCount(i32),
    /// Node selector in effect before the unsatisfiable one was applied.
    /// Empty means the workload had no selector.
    PlacementSelector(BTreeMap<String, String>),
}

/// Address of a single workload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub kind: WorkloadKind,
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Snapshot of one workload's scale and readiness
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadResource {
    pub name: String,
    pub namespace: String,
    pub kind: WorkloadKind,
    /// Declared replica count; for daemons, the number of pods the
    /// controller wants scheduled.
    pub declared_replicas: i32,
    pub ready_replicas: i32,
    /// Current pod node selector (daemons only)
    pub node_selector: Option<BTreeMap<String, String>>,
    /// Daemon is held on the reserved unsatisfiable selector
    pub is_stopped: bool,
    pub restore_hint: Option<RestoreHint>,
}

impl WorkloadResource {
    /// A replica-controlled workload with no restore hint.
    pub fn replica(
        name: &str,
        namespace: &str,
        kind: WorkloadKind,
        declared_replicas: i32,
        ready_replicas: i32,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind,
            declared_replicas,
            ready_replicas,
            node_selector: None,
            is_stopped: false,
            restore_hint: None,
        }
    }

    /// A daemon workload; `is_stopped` is derived from the selector.
    pub fn daemon(
        name: &str,
        namespace: &str,
        desired_scheduled: i32,
        ready: i32,
        node_selector: Option<BTreeMap<String, String>>,
    ) -> Self {
        let is_stopped = crate::annotations::is_stop_selector(node_selector.as_ref());
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind: WorkloadKind::DaemonSet,
            declared_replicas: desired_scheduled,
            ready_replicas: ready,
            node_selector,
            is_stopped,
            restore_hint: None,
        }
    }

    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }

    /// All declared replicas are ready. A stopped daemon has nothing to wait for.
    pub fn is_ready(&self) -> bool {
        self.is_stopped || self.ready_replicas >= self.declared_replicas
    }

    /// Replica count stored before the last stop, if any.
    pub fn stored_replica_count(&self) -> Option<i32> {
        match &self.restore_hint {
            Some(RestoreHint::ReplicaCount(n)) => Some(*n),
            _ => None,
        }
    }
}
