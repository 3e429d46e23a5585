//! Tenant lifecycle
//!
//! A tenant is a namespace. Starting, stopping and resizing it goes through
//! the orchestrator, then the transition recorder, then the tenant row and
//! the audit trail, in that order.

use super::inventory::WorkloadInventory;
use super::orchestrator::{ScaleReport, ScalingOrchestrator};
use super::recorder::TransitionRecorder;
use crate::error::{OperatorError, Result};
use crate::model::{AuditAction, NewAuditEntry, NewTenant, Tenant, TenantStateTransition};
use crate::state::{self, derive_new_state, ObservedStatus, TenantState};
use crate::store::Store;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Namespaces hidden from tenant listings by default
pub const DEFAULT_EXCLUDED_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

/// Replica count requested by a plain start
pub const START_REPLICAS: i32 = 1;

/// Result of scaling a tenant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantScaleOutcome {
    pub tenant: Tenant,
    pub report: ScaleReport,
    /// Destination state derived after the scale
    pub state: TenantState,
    /// Transition appended by this scale, if the state changed
    #[serde(default)]
    pub transition: Option<TenantStateTransition>,
}

/// Live status of a tenant namespace joined with its bookkeeping row
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatusSummary {
    pub namespace: String,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub status: ObservedStatus,
    #[serde(default)]
    pub desired_replicas: Option<i32>,
    #[serde(default)]
    pub last_scaled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_scaled_by: Option<String>,
}

/// Scales tenants and keeps their bookkeeping in step
pub struct TenantService {
    orchestrator: Arc<ScalingOrchestrator>,
    recorder: TransitionRecorder,
    store: Arc<dyn Store>,
    excluded_namespaces: Vec<String>,
}

impl TenantService {
    pub fn new(orchestrator: Arc<ScalingOrchestrator>, store: Arc<dyn Store>) -> Self {
        Self {
            orchestrator,
            recorder: TransitionRecorder::new(store.clone()),
            store,
            excluded_namespaces: DEFAULT_EXCLUDED_NAMESPACES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the namespaces hidden from [`list_tenants`](Self::list_tenants).
    pub fn with_excluded_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.excluded_namespaces = namespaces;
        self
    }

    fn inventory(&self) -> &WorkloadInventory {
        self.orchestrator.inventory()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Scale every workload of `namespace` to `replicas`.
    pub async fn scale_tenant(&self, namespace: &str, replicas: i32, actor: &str) -> Result<TenantScaleOutcome> {
        self.scale(namespace, replicas, actor, AuditAction::for_scale(replicas)).await
    }

    /// Bring a tenant back up; replica workloads return to their stored size.
    pub async fn start_tenant(&self, namespace: &str, actor: &str) -> Result<TenantScaleOutcome> {
        self.scale(namespace, START_REPLICAS, actor, AuditAction::TenantStart).await
    }

    pub async fn stop_tenant(&self, namespace: &str, actor: &str) -> Result<TenantScaleOutcome> {
        self.scale(namespace, 0, actor, AuditAction::TenantStop).await
    }

    async fn scale(
        &self,
        namespace: &str,
        replicas: i32,
        actor: &str,
        action: AuditAction,
    ) -> Result<TenantScaleOutcome> {
        if !self.inventory().namespace_exists(namespace).await? {
            return Err(OperatorError::NotFound(format!("namespace {}", namespace)));
        }

        let report = match self.orchestrator.scale_namespace(namespace, replicas).await {
            Ok(report) => report,
            Err(e) => {
                error!(namespace = %namespace, error = %e, "Failed to scale tenant");
                let tenant_id = self
                    .store
                    .find_tenant_by_namespace(namespace)
                    .await
                    .ok()
                    .flatten()
                    .map(|t| t.id);
                self.audit(NewAuditEntry::failure(
                    tenant_id,
                    action,
                    actor,
                    &e.to_string(),
                    serde_json::json!({ "namespace": namespace, "replicas": replicas }),
                ))
                .await;
                return Err(e);
            }
        };

        let (mut tenant, existed) = self.get_or_create(namespace).await?;
        let previous_replicas = existed.then_some(tenant.current_replicas);
        let new_replicas = if replicas == 0 {
            0
        } else {
            report.applied_replica_total().unwrap_or(replicas)
        };

        let workloads = self.inventory().list(namespace).await?;
        let state = derive_new_state(new_replicas, &workloads);
        let transition = self
            .recorder
            .record_if_changed(
                tenant.id,
                previous_replicas,
                new_replicas,
                &workloads,
                actor,
                Some(format!("Scale to {} replicas", new_replicas)),
            )
            .await?;

        let now = Utc::now();
        tenant.current_replicas = new_replicas;
        if new_replicas > 0 {
            tenant.desired_replicas = new_replicas;
        }
        tenant.last_scaled_at = Some(now);
        tenant.last_scaled_by = Some(actor.to_string());
        tenant.updated_at = now;
        self.store.update_tenant(&tenant).await?;

        let details = serde_json::json!({
            "namespace": namespace,
            "requestedReplicas": replicas,
            "appliedReplicas": new_replicas,
            "result": report,
        });
        let entry = if report.is_partial_failure() {
            warn!(
                namespace = %namespace,
                failed = report.failed(),
                "Tenant scaled with failures"
            );
            NewAuditEntry::failure(Some(tenant.id), action, actor, &report.failures().join("; "), details)
        } else {
            NewAuditEntry::success(Some(tenant.id), action, actor, details)
        };
        self.audit(entry).await;

        info!(
            namespace = %namespace,
            tenant_id = tenant.id,
            replicas = new_replicas,
            state = %state,
            actor = %actor,
            "Tenant scaled"
        );

        Ok(TenantScaleOutcome {
            tenant,
            report,
            state,
            transition,
        })
    }

    async fn audit(&self, entry: NewAuditEntry) {
        if let Err(e) = self.store.append_audit(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    async fn get_or_create(&self, namespace: &str) -> Result<(Tenant, bool)> {
        if let Some(tenant) = self.store.find_tenant_by_namespace(namespace).await? {
            return Ok((tenant, true));
        }
        match self.store.insert_tenant(NewTenant::auto_created(namespace)).await {
            Ok(tenant) => {
                info!(namespace = %namespace, tenant_id = tenant.id, "Created tenant record");
                Ok((tenant, false))
            }
            // lost a race with another writer
            Err(OperatorError::InvalidState(_)) => self
                .store
                .find_tenant_by_namespace(namespace)
                .await?
                .map(|t| (t, true))
                .ok_or_else(|| OperatorError::NotFound(format!("tenant for namespace {}", namespace))),
            Err(e) => Err(e),
        }
    }

    /// Tenant row for `namespace`, created if the namespace exists and has none.
    pub async fn ensure_tenant(&self, namespace: &str) -> Result<Tenant> {
        if !self.inventory().namespace_exists(namespace).await? {
            return Err(OperatorError::NotFound(format!("namespace {}", namespace)));
        }
        Ok(self.get_or_create(namespace).await?.0)
    }

    /// Status recomputed from the live inventory.
    pub async fn observe_namespace(&self, namespace: &str) -> Result<ObservedStatus> {
        let workloads = self.inventory().list(namespace).await?;
        Ok(state::observe(&workloads))
    }

    /// Every non-excluded namespace that has workloads.
    pub async fn list_tenants(&self) -> Result<Vec<TenantStatusSummary>> {
        let rows = self.store.list_tenants().await?;
        let mut summaries = Vec::new();

        for namespace in self.inventory().namespaces().await? {
            if self.excluded_namespaces.iter().any(|ex| *ex == namespace) {
                continue;
            }
            let workloads = match self.inventory().list(&namespace).await {
                Ok(workloads) => workloads,
                // deleted between the two reads
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if workloads.is_empty() {
                continue;
            }

            let row = rows.iter().find(|t| t.namespace == namespace);
            summaries.push(TenantStatusSummary {
                tenant_id: row.map(|t| t.id),
                status: state::observe(&workloads),
                desired_replicas: row.map(|t| t.desired_replicas),
                last_scaled_at: row.and_then(|t| t.last_scaled_at),
                last_scaled_by: row.and_then(|t| t.last_scaled_by.clone()),
                namespace,
            });
        }

        Ok(summaries)
    }
}
