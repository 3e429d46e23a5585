//! Tenant bookkeeping rows
//!
//! The cluster is authoritative for workload state; a tenant row anchors
//! schedules and history and caches the last scale that went through the
//! operator.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A tenant, identified by its namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Last running size requested through the operator
    pub desired_replicas: i32,
    /// Replica count applied by the last scale
    pub current_replicas: i32,
    #[serde(default)]
    pub last_scaled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_scaled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a tenant about to be inserted
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub namespace: String,
    pub description: Option<String>,
}

impl NewTenant {
    /// Row created implicitly the first time a namespace is touched.
    pub fn auto_created(namespace: &str) -> Self {
        Self {
            name: namespace.to_string(),
            namespace: namespace.to_string(),
            description: Some(format!("Auto-created for namespace {}", namespace)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_created_tenant() {
        let tenant = NewTenant::auto_created("acme");
        assert_eq!(tenant.name, "acme");
        assert_eq!(tenant.namespace, "acme");
        assert_eq!(tenant.description.as_deref(), Some("Auto-created for namespace acme"));
    }
}
