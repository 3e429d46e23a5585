//! Append-only tenant state transitions

use crate::state::TenantState;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Actor id used for automated fires
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// An immutable record of a tenant's coarse state changing
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStateTransition {
    pub id: i64,
    pub tenant_id: i64,
    pub previous_state: TenantState,
    pub new_state: TenantState,
    #[serde(default)]
    pub previous_replicas: Option<i32>,
    pub new_replicas: i32,
    pub changed_at: DateTime<Utc>,
    /// User id, or `"scheduler"` for automated fires
    pub changed_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}
