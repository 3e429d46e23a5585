//! Coarse tenant state and how it is derived
//!
//! Two read paths exist for a tenant's state:
//!
//! - **Observed state** is always recomputed from the live workload inventory
//!   ([`observe`]).
//! - **Recorded state** is the append-only transition log, written only by
//!   the [`TransitionRecorder`](crate::controllers::TransitionRecorder) using
//!   [`derive_new_state`] and [`derive_previous_state`].
//!
//! The destination of a transition is fine-grained (`scaling` vs `running`),
//! the origin is not: it is rebuilt from the previous replica count alone.

use crate::model::WorkloadResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse lifecycle state of a tenant
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TenantState {
    /// No workloads discovered, or nothing recorded yet
    #[default]
    Unknown,
    /// Scaled to zero
    Stopped,
    /// Replicas requested but not all ready
    Scaling,
    /// All requested replicas ready
    Running,
}

impl TenantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantState::Unknown => "unknown",
            TenantState::Stopped => "stopped",
            TenantState::Scaling => "scaling",
            TenantState::Running => "running",
        }
    }

    /// Running and scaling both count as uptime.
    pub fn is_up(&self) -> bool {
        matches!(self, TenantState::Running | TenantState::Scaling)
    }
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TenantState::Unknown),
            "stopped" => Ok(TenantState::Stopped),
            "scaling" => Ok(TenantState::Scaling),
            "running" => Ok(TenantState::Running),
            other => Err(format!("unknown tenant state '{}'", other)),
        }
    }
}

/// Destination state of a transition.
///
/// An empty inventory is `unknown` regardless of the replica count.
pub fn derive_new_state(new_replicas: i32, workloads: &[WorkloadResource]) -> TenantState {
    if workloads.is_empty() {
        return TenantState::Unknown;
    }
    if new_replicas == 0 {
        return TenantState::Stopped;
    }
    if workloads.iter().all(WorkloadResource::is_ready) {
        TenantState::Running
    } else {
        TenantState::Scaling
    }
}

/// Origin state of a transition, from the previously recorded replica count.
pub fn derive_previous_state(previous_replicas: Option<i32>) -> TenantState {
    match previous_replicas {
        None => TenantState::Unknown,
        Some(0) => TenantState::Stopped,
        Some(_) => TenantState::Running,
    }
}

/// Aggregate of the live inventory of one namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    pub state: TenantState,
    /// Declared replicas summed over running workloads
    pub total_replicas: i32,
    /// Ready replicas summed over running workloads
    pub ready_replicas: i32,
    /// Number of daemon workloads held on the unsatisfiable selector
    pub stopped_daemons: usize,
    pub workload_count: usize,
}

/// Compute the observed state of a namespace from its inventory.
pub fn observe(workloads: &[WorkloadResource]) -> ObservedStatus {
    let mut total_replicas = 0;
    let mut ready_replicas = 0;
    let mut stopped_daemons = 0;

    for workload in workloads {
        if workload.is_stopped {
            stopped_daemons += 1;
            continue;
        }
        total_replicas += workload.declared_replicas;
        ready_replicas += workload.ready_replicas;
    }

    let state = if workloads.is_empty() {
        TenantState::Unknown
    } else if total_replicas == 0 || stopped_daemons > 0 {
        TenantState::Stopped
    } else if ready_replicas >= total_replicas {
        TenantState::Running
    } else {
        TenantState::Scaling
    };

    ObservedStatus {
        state,
        total_replicas,
        ready_replicas,
        stopped_daemons,
        workload_count: workloads.len(),
    }
}
