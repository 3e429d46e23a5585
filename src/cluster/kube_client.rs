//! [`ClusterApi`] over the Kubernetes API

use super::ClusterApi;
use crate::annotations::{self, FIELD_MANAGER};
use crate::error::{OperatorError, Result};
use crate::model::{RestoreHint, WorkloadKind, WorkloadRef, WorkloadResource};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Kubernetes-backed cluster access
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn patch_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER)
    }

    async fn patch_annotation(&self, workload: &WorkloadRef, key: &str, value: &str) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "annotations": { key: value }
            }
        });
        let pp = Self::patch_params();
        let ns = &workload.namespace;
        match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
                api.patch(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), ns);
                api.patch(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), ns);
                api.patch(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
        }
        Ok(())
    }
}

fn deployment_resource(deployment: &Deployment) -> WorkloadResource {
    let mut resource = WorkloadResource::replica(
        &deployment.name_any(),
        &deployment.namespace().unwrap_or_default(),
        WorkloadKind::Deployment,
        deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
    );
    resource.restore_hint =
        annotations::decode_restore_hint(WorkloadKind::Deployment, Some(deployment.annotations()));
    resource
}

fn statefulset_resource(statefulset: &StatefulSet) -> WorkloadResource {
    let mut resource = WorkloadResource::replica(
        &statefulset.name_any(),
        &statefulset.namespace().unwrap_or_default(),
        WorkloadKind::StatefulSet,
        statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        statefulset.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
    );
    resource.restore_hint =
        annotations::decode_restore_hint(WorkloadKind::StatefulSet, Some(statefulset.annotations()));
    resource
}

fn daemonset_resource(daemonset: &DaemonSet) -> WorkloadResource {
    let node_selector = daemonset
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.node_selector.clone());
    let (desired, ready) = daemonset
        .status
        .as_ref()
        .map(|s| (s.desired_number_scheduled, s.number_ready))
        .unwrap_or((0, 0));

    let mut resource = WorkloadResource::daemon(
        &daemonset.name_any(),
        &daemonset.namespace().unwrap_or_default(),
        desired,
        ready,
        node_selector,
    );
    resource.restore_hint =
        annotations::decode_restore_hint(WorkloadKind::DaemonSet, Some(daemonset.annotations()));
    resource
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.is_some())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadResource>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let daemonsets: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default();

        let (deployments, statefulsets, daemonsets) = futures::try_join!(
            deployments.list(&lp),
            statefulsets.list(&lp),
            daemonsets.list(&lp),
        )?;

        let mut workloads: Vec<WorkloadResource> = deployments.items.iter().map(deployment_resource).collect();
        workloads.extend(statefulsets.items.iter().map(statefulset_resource));
        workloads.extend(daemonsets.items.iter().map(daemonset_resource));

        debug!(namespace = %namespace, count = workloads.len(), "Listed workloads");
        Ok(workloads)
    }

    async fn get_workload(&self, workload: &WorkloadRef) -> Result<WorkloadResource> {
        let ns = &workload.namespace;
        let resource = match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
                deployment_resource(&api.get(&workload.name).await?)
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), ns);
                statefulset_resource(&api.get(&workload.name).await?)
            }
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), ns);
                daemonset_resource(&api.get(&workload.name).await?)
            }
        };
        Ok(resource)
    }

    async fn scale_replicas(&self, workload: &WorkloadRef, replicas: i32) -> Result<()> {
        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas,
            }
        });
        let pp = Self::patch_params();
        let ns = &workload.namespace;

        match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
                api.patch_scale(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), ns);
                api.patch_scale(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::DaemonSet => {
                return Err(OperatorError::InvalidState(format!(
                    "{} has no replica count",
                    workload
                )));
            }
        }

        info!(resource = %workload, replicas, "Scaled workload");
        Ok(())
    }

    async fn annotate_restore_hint(&self, workload: &WorkloadRef, hint: &RestoreHint) -> Result<()> {
        let (key, value) = annotations::encode_restore_hint(hint)?;
        self.patch_annotation(workload, key, &value).await?;
        debug!(resource = %workload, annotation = key, value = %value, "Stored restore hint");
        Ok(())
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

        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &workload.namespace);
        let mut daemonset = api.get(&workload.name).await?;

        let pod_spec = daemonset
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .ok_or_else(|| {
                OperatorError::InvalidState(format!("{} has no pod template spec", workload))
            })?;
        pod_spec.node_selector = node_selector;

        let key = annotations::restore_hint_key(WorkloadKind::DaemonSet);
        let workload_annotations = daemonset.annotations_mut();
        match hint {
            Some(hint) => {
                let (key, value) = annotations::encode_restore_hint(hint)?;
                workload_annotations.insert(key.to_string(), value);
            }
            None => {
                workload_annotations.remove(key);
            }
        }

        // Full replace so the selector is swapped rather than merged
        api.replace(&workload.name, &PostParams::default(), &daemonset)
            .await?;

        info!(resource = %workload, restore_hint = hint.is_some(), "Replaced daemon placement");
        Ok(())
    }
}
