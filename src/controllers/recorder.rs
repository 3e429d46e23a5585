//! State transition recorder
//!
//! The only code path that appends to the transition log. [`NewTransition`]
//! has private fields and no public constructor, so a [`Store`] can only be
//! handed rows that went through the state-change check below.

use crate::error::Result;
use crate::model::{TenantStateTransition, WorkloadResource};
use crate::state::{derive_new_state, derive_previous_state, TenantState};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// A transition about to be appended, built by [`TransitionRecorder`]
#[derive(Debug, Clone)]
pub struct NewTransition {
    tenant_id: i64,
    previous_state: TenantState,
    new_state: TenantState,
    previous_replicas: Option<i32>,
    new_replicas: i32,
    changed_at: DateTime<Utc>,
    changed_by: String,
    reason: Option<String>,
}

impl NewTransition {
    pub fn tenant_id(&self) -> i64 {
        self.tenant_id
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Turn into the stored row once the store has assigned an id.
    pub fn into_row(self, id: i64) -> TenantStateTransition {
        TenantStateTransition {
            id,
            tenant_id: self.tenant_id,
            previous_state: self.previous_state,
            new_state: self.new_state,
            previous_replicas: self.previous_replicas,
            new_replicas: self.new_replicas,
            changed_at: self.changed_at,
            changed_by: self.changed_by,
            reason: self.reason,
        }
    }
}

/// Appends a transition when a tenant's coarse state changes
#[derive(Clone)]
pub struct TransitionRecorder {
    store: Arc<dyn Store>,
}

impl TransitionRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a transition if the derived state differs from the previous
    /// one, or if the tenant has no transition yet.
    ///
    /// `workloads` is the inventory read after the scale; it decides between
    /// `running` and `scaling` and turns an empty namespace into `unknown`.
    pub async fn record_if_changed(
        &self,
        tenant_id: i64,
        previous_replicas: Option<i32>,
        new_replicas: i32,
        workloads: &[WorkloadResource],
        actor: &str,
        reason: Option<String>,
    ) -> Result<Option<TenantStateTransition>> {
        self.record_if_changed_at(
            tenant_id,
            previous_replicas,
            new_replicas,
            workloads,
            actor,
            reason,
            Utc::now(),
        )
        .await
    }

    /// [`Self::record_if_changed`] with an explicit change time.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn record_if_changed_at(
        &self,
        tenant_id: i64,
        previous_replicas: Option<i32>,
        new_replicas: i32,
        workloads: &[WorkloadResource],
        actor: &str,
        reason: Option<String>,
        changed_at: DateTime<Utc>,
    ) -> Result<Option<TenantStateTransition>> {
        let previous_state = derive_previous_state(previous_replicas);
        let new_state = derive_new_state(new_replicas, workloads);

        let first = self.store.last_transition(tenant_id).await?.is_none();
        if !first && previous_state == new_state {
            debug!(tenant_id, state = %new_state, "State unchanged, no transition recorded");
            return Ok(None);
        }

        let transition = self
            .store
            .append_transition(NewTransition {
                tenant_id,
                previous_state,
                new_state,
                previous_replicas,
                new_replicas,
                changed_at,
                changed_by: actor.to_string(),
                reason,
            })
            .await?;

        info!(
            tenant_id,
            from = %previous_state,
            to = %new_state,
            actor = %actor,
            "Recorded state transition"
        );
        Ok(Some(transition))
    }
}

/// Seed history for tests: records a move into `state` at `changed_at`
/// through the regular recording path.
#[cfg(test)]
pub(crate) async fn record_state_at(
    recorder: &TransitionRecorder,
    tenant_id: i64,
    state: TenantState,
    changed_at: DateTime<Utc>,
) -> TenantStateTransition {
    use crate::model::WorkloadKind;

    let web = |declared: i32, ready: i32| {
        vec![WorkloadResource::replica("web", "acme", WorkloadKind::Deployment, declared, ready)]
    };
    // previous replicas are picked so the coarse state always changes
    let (previous, new_replicas, workloads) = match state {
        TenantState::Stopped => (Some(1), 0, web(0, 0)),
        TenantState::Running => (Some(0), 1, web(1, 1)),
        TenantState::Scaling => (Some(0), 2, web(2, 1)),
        TenantState::Unknown => (Some(0), 0, Vec::new()),
    };
    recorder
        .record_if_changed_at(tenant_id, previous, new_replicas, &workloads, "alice", None, changed_at)
        .await
        .unwrap()
        .unwrap()
}
