//! Audit trail of operator actions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of audited action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TenantStart,
    TenantStop,
    TenantScale,
    ScheduleCreate,
    ScheduleUpdate,
    ScheduleDelete,
    ScheduleExecute,
}

impl AuditAction {
    /// Audit action for a namespace scale to `replicas`.
    pub fn for_scale(replicas: i32) -> Self {
        if replicas == 0 {
            AuditAction::TenantStop
        } else {
            AuditAction::TenantScale
        }
    }
}

/// One audit row
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    pub action: AuditAction,
    pub actor: String,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Free-form context (replica counts, schedule id, scale results)
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An audit row about to be appended
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub tenant_id: Option<i64>,
    pub action: AuditAction,
    pub actor: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn success(
        tenant_id: Option<i64>,
        action: AuditAction,
        actor: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            action,
            actor: actor.to_string(),
            success: true,
            error_message: None,
            details,
        }
    }

    pub fn failure(
        tenant_id: Option<i64>,
        action: AuditAction,
        actor: &str,
        error: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            action,
            actor: actor.to_string(),
            success: false,
            error_message: Some(error.to_string()),
            details,
        }
    }
}
