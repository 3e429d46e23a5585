//! Scheduled start/stop actions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of `last_run_status`
pub const LAST_RUN_STATUS_MAX_LEN: usize = 50;

/// Status recorded after a successful fire
pub const STATUS_SUCCESS: &str = "success";

/// What a schedule does when it fires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    /// Scale the tenant back up, restoring stored replica counts
    Start,
    /// Scale the tenant to zero
    Stop,
}

impl ScheduleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleAction::Start => "start",
            ScheduleAction::Stop => "stop",
        }
    }
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(ScheduleAction::Start),
            "stop" => Ok(ScheduleAction::Stop),
            other => Err(format!("unknown schedule action '{}'", other)),
        }
    }
}

/// A persisted cron-driven action against one tenant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAction {
    pub id: i64,
    pub tenant_id: i64,
    pub action: ScheduleAction,
    /// Five-field cron expression (minute hour day-of-month month day-of-week)
    pub cron_expression: String,
    /// IANA timezone the expression is evaluated in
    pub timezone: String,
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    /// `"success"` or `"failed: <reason>"`, capped at [`LAST_RUN_STATUS_MAX_LEN`]
    #[serde(default)]
    pub last_run_status: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a schedule about to be inserted
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub tenant_id: i64,
    pub action: ScheduleAction,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// A request to create a schedule, addressing the tenant by id or namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub namespace: Option<String>,
    pub action: ScheduleAction,
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update of a schedule; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub action: Option<ScheduleAction>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Build a `last_run_status` value, capped at [`LAST_RUN_STATUS_MAX_LEN`] characters.
pub fn run_status(outcome: std::result::Result<(), &str>) -> String {
    let status = match outcome {
        Ok(()) => STATUS_SUCCESS.to_string(),
        Err(reason) => format!("failed: {}", reason),
    };
    status.chars().take(LAST_RUN_STATUS_MAX_LEN).collect()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!("START".parse::<ScheduleAction>(), Ok(ScheduleAction::Start));
        assert_eq!("stop".parse::<ScheduleAction>(), Ok(ScheduleAction::Stop));
        assert!("scale".parse::<ScheduleAction>().is_err());
        assert_eq!(ScheduleAction::Stop.to_string(), "stop");
    }

    #[test]
    fn test_schedule_request_defaults() {
        let json = r#"{
            "namespace": "acme",
            "action": "stop",
            "cronExpression": "0 18 * * 1-5"
        }"#;
        let request: ScheduleRequest = serde_json::from_str(json).unwrap();
        assert!(request.enabled);
        assert_eq!(request.namespace.as_deref(), Some("acme"));
        assert_eq!(request.tenant_id, None);
        assert_eq!(request.timezone, None);
        assert_eq!(request.action, ScheduleAction::Stop);
    }

    #[test]
    fn test_run_status_success() {
        assert_eq!(run_status(Ok(())), "success");
    }

    #[test]
    fn test_run_status_is_capped() {
        let reason = "x".repeat(200);
        let status = run_status(Err(reason.as_str()));
        assert_eq!(status.chars().count(), LAST_RUN_STATUS_MAX_LEN);
        assert!(status.starts_with("failed: xxx"));
    }

    #[test]
    fn test_run_status_truncates_on_char_boundary() {
        let reason = "é".repeat(100);
        let status = run_status(Err(reason.as_str()));
        assert_eq!(status.chars().count(), LAST_RUN_STATUS_MAX_LEN);
    }
}
