//! In-memory [`ClusterApi`] for tests

use super::ClusterApi;
use crate::annotations;
use crate::error::{OperatorError, Result};
use crate::model::{RestoreHint, WorkloadKind, WorkloadRef, WorkloadResource};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

/// Pods a running fake daemon schedules
pub const FAKE_NODE_COUNT: i32 = 3;

#[derive(Default)]
struct FakeState {
    namespaces: BTreeSet<String>,
    workloads: Vec<WorkloadResource>,
    /// Workload names whose mutations fail
    failing: HashSet<String>,
    /// Workload names deleted right after the next listing returns them
    vanishing: HashSet<String>,
    /// Replicas become ready immediately after a scale
    auto_ready: bool,
    /// Number of placement replaces issued, by workload name
    placement_writes: BTreeMap<String, usize>,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                auto_ready: true,
                ..Default::default()
            }),
        }
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state.lock().unwrap().namespaces.insert(namespace.to_string());
    }

    /// Add a workload, creating its namespace.
    pub fn add_workload(&self, workload: WorkloadResource) {
        let mut state = self.state.lock().unwrap();
        state.namespaces.insert(workload.namespace.clone());
        state.workloads.push(workload);
    }

    pub fn remove_workload(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .workloads
            .retain(|w| !(w.namespace == namespace && w.name == name));
    }

    /// Delete `name` as soon as a listing has returned it, as if it was
    /// removed between the list and the per-workload read.
    pub fn vanish_after_list(&self, name: &str) {
        self.state.lock().unwrap().vanishing.insert(name.to_string());
    }

    pub fn fail_workload(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.state.lock().unwrap().auto_ready = auto_ready;
    }

    /// Mark every replica of every workload in `namespace` as ready.
    pub fn make_ready(&self, namespace: &str) {
        let mut state = self.state.lock().unwrap();
        for w in state.workloads.iter_mut().filter(|w| w.namespace == namespace) {
            w.ready_replicas = w.declared_replicas;
        }
    }

    pub fn workload(&self, namespace: &str, name: &str) -> WorkloadResource {
        self.state
            .lock()
            .unwrap()
            .workloads
            .iter()
            .find(|w| w.namespace == namespace && w.name == name)
            .cloned()
            .unwrap()
    }

    pub fn placement_writes(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .placement_writes
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    fn with_workload<T>(
        &self,
        workload: &WorkloadRef,
        mutate: impl FnOnce(&mut WorkloadResource, bool) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&workload.name) {
            return Err(OperatorError::KubeApi(format!("injected failure for {}", workload)));
        }
        let auto_ready = state.auto_ready;
        let found = state
            .workloads
            .iter_mut()
            .find(|w| w.reference() == *workload)
            .ok_or_else(|| OperatorError::NotFound(workload.to_string()))?;
        mutate(found, auto_ready)
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.contains(namespace))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().namespaces.iter().cloned().collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadResource>> {
        let (listed, vanishing) = {
            let mut state = self.state.lock().unwrap();
            let listed: Vec<WorkloadResource> = state
                .workloads
                .iter()
                .filter(|w| w.namespace == namespace)
                .cloned()
                .collect();
            let vanishing: Vec<String> = listed
                .iter()
                .filter(|w| state.vanishing.contains(&w.name))
                .map(|w| w.name.clone())
                .collect();
            for name in &vanishing {
                state.vanishing.remove(name);
            }
            (listed, vanishing)
        };
        for name in vanishing {
            self.remove_workload(namespace, &name);
        }
        Ok(listed)
    }

    async fn get_workload(&self, workload: &WorkloadRef) -> Result<WorkloadResource> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(&workload.name) {
            return Err(OperatorError::KubeApi(format!("injected failure for {}", workload)));
        }
        state
            .workloads
            .iter()
            .find(|w| w.reference() == *workload)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(workload.to_string()))
    }

    async fn scale_replicas(&self, workload: &WorkloadRef, replicas: i32) -> Result<()> {
        self.with_workload(workload, |w, auto_ready| {
            w.declared_replicas = replicas;
            w.ready_replicas = if auto_ready { replicas } else { w.ready_replicas.min(replicas) };
            Ok(())
        })
    }

    async fn annotate_restore_hint(&self, workload: &WorkloadRef, hint: &RestoreHint) -> Result<()> {
        self.with_workload(workload, |w, _| {
            w.restore_hint = Some(hint.clone());
            Ok(())
        })
    }

    async fn apply_placement(
        &self,
        workload: &WorkloadRef,
        node_selector: Option<BTreeMap<String, String>>,
        hint: Option<&RestoreHint>,
    ) -> Result<()> {
        if workload.kind != WorkloadKind::DaemonSet {
            return Err(OperatorError::InvalidState(format!(
                "{} is not placement controlled",
                workload
            )));
        }
        self.with_workload(workload, |w, auto_ready| {
            w.is_stopped = annotations::is_stop_selector(node_selector.as_ref());
            w.node_selector = node_selector;
            w.restore_hint = hint.cloned();
            if w.is_stopped {
                w.declared_replicas = 0;
                w.ready_replicas = 0;
            } else {
                w.declared_replicas = FAKE_NODE_COUNT;
                w.ready_replicas = if auto_ready { FAKE_NODE_COUNT } else { 0 };
            }
            Ok(())
        })?;
        *self
            .state
            .lock()
            .unwrap()
            .placement_writes
            .entry(workload.name.clone())
            .or_default() += 1;
        Ok(())
    }
}
