//! Uptime and downtime metrics
//!
//! Durations are reconstructed from the transition log alone. Over a window
//! `[start, end]` the state in effect at `start` is the destination of the
//! last transition before it (or `stopped` when there is none). Each stretch
//! of time is charged to the state that was active during it:
//!
//! | State     | Uptime | Downtime | Scaling |
//! |-----------|--------|----------|---------|
//! | `running` | yes    |          |         |
//! | `scaling` | yes    |          | yes     |
//! | `stopped` |        | yes      |         |
//! | `unknown` |        |          |         |

use crate::error::{OperatorError, Result};
use crate::model::TenantStateTransition;
use crate::state::TenantState;
use crate::store::Store;
use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Default number of rows returned by [`MetricsEngine::state_history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Time accumulated per bucket over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSplit {
    pub uptime: TimeDelta,
    pub downtime: TimeDelta,
    /// Part of `uptime` spent scaling
    pub scaling: TimeDelta,
}

impl Default for DurationSplit {
    fn default() -> Self {
        Self {
            uptime: TimeDelta::zero(),
            downtime: TimeDelta::zero(),
            scaling: TimeDelta::zero(),
        }
    }
}

impl DurationSplit {
    fn accrue(&mut self, state: TenantState, elapsed: TimeDelta) {
        match state {
            TenantState::Running => self.uptime += elapsed,
            TenantState::Scaling => {
                self.uptime += elapsed;
                self.scaling += elapsed;
            }
            TenantState::Stopped => self.downtime += elapsed,
            TenantState::Unknown => {}
        }
    }
}

/// Split `[start, end]` into uptime, downtime and scaling time.
///
/// `transitions` must be ordered by `changed_at` ascending; transitions after
/// `end` are ignored. An empty or inverted window yields zero everywhere.
pub fn integrate(
    transitions: &[TenantStateTransition],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DurationSplit {
    let mut split = DurationSplit::default();
    if end <= start {
        return split;
    }

    let mut state = transitions
        .iter()
        .filter(|t| t.changed_at < start)
        .last()
        .map(|t| t.new_state)
        .unwrap_or(TenantState::Stopped);
    let mut cursor = start;

    for transition in transitions
        .iter()
        .filter(|t| t.changed_at >= start && t.changed_at <= end)
    {
        split.accrue(state, transition.changed_at - cursor);
        cursor = transition.changed_at;
        state = transition.new_state;
    }
    split.accrue(state, end - cursor);

    split
}

/// Human-readable duration: `45s`, `12m`, `3h 20m`, `2d 5h`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    if hours < 24 {
        return if remaining_minutes > 0 {
            format!("{}h {}m", hours, remaining_minutes)
        } else {
            format!("{}h", hours)
        };
    }

    let days = hours / 24;
    let remaining_hours = hours % 24;
    if remaining_hours > 0 {
        format!("{}d {}h", days, remaining_hours)
    } else {
        format!("{}d", days)
    }
}

fn percentage(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

/// Calendar-month window in UTC, clipped to `now`.
///
/// The window ends at 23:59:59 on the last day of the month. A month that has
/// not started yet has zero length.
pub fn month_window(year: i32, month: u32, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || OperatorError::Validation(format!("invalid month {}-{:02}", year, month));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .ok_or_else(invalid)?;

    let start = first.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc();
    let mut end = last.and_hms_opt(23, 59, 59).ok_or_else(invalid)?.and_utc();
    if end > now {
        end = now;
    }
    if end < start {
        end = start;
    }
    Ok((start, end))
}

/// Uptime/downtime of one tenant over one calendar month
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReport {
    pub tenant_id: i64,
    pub year: i32,
    pub month: u32,
    pub uptime_seconds: i64,
    pub downtime_seconds: i64,
    /// Included in `uptime_seconds`
    pub scaling_seconds: i64,
    pub uptime_percentage: f64,
    pub downtime_percentage: f64,
    pub uptime_formatted: String,
    pub downtime_formatted: String,
    pub scaling_formatted: String,
    /// Uptime plus downtime; time in `unknown` is not counted
    pub total_seconds: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// How long a tenant has been in its latest recorded state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStateDuration {
    pub current_state: TenantState,
    pub duration_seconds: i64,
    pub duration_formatted: String,
    #[serde(default)]
    pub state_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub changed_by: Option<String>,
}

/// Read-side queries over the transition log
pub struct MetricsEngine {
    store: Arc<dyn Store>,
}

impl MetricsEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn ensure_tenant(&self, tenant_id: i64) -> Result<()> {
        if self.store.get_tenant(tenant_id).await?.is_none() {
            return Err(OperatorError::NotFound(format!("tenant {}", tenant_id)));
        }
        Ok(())
    }

    pub async fn monthly_report(&self, tenant_id: i64, year: i32, month: u32) -> Result<MonthlyReport> {
        self.monthly_report_at(tenant_id, year, month, Utc::now()).await
    }

    pub async fn monthly_report_at(
        &self,
        tenant_id: i64,
        year: i32,
        month: u32,
        now: DateTime<Utc>,
    ) -> Result<MonthlyReport> {
        let (window_start, window_end) = month_window(year, month, now)?;
        self.ensure_tenant(tenant_id).await?;

        let transitions = self.store.transitions_until(tenant_id, window_end).await?;
        let split = integrate(&transitions, window_start, window_end);

        let uptime_seconds = split.uptime.num_seconds();
        let downtime_seconds = split.downtime.num_seconds();
        let scaling_seconds = split.scaling.num_seconds();
        let total_seconds = uptime_seconds + downtime_seconds;

        debug!(
            tenant_id,
            year,
            month,
            transitions = transitions.len(),
            uptime_seconds,
            downtime_seconds,
            "Computed monthly report"
        );

        Ok(MonthlyReport {
            tenant_id,
            year,
            month,
            uptime_seconds,
            downtime_seconds,
            scaling_seconds,
            uptime_percentage: percentage(uptime_seconds, total_seconds),
            downtime_percentage: percentage(downtime_seconds, total_seconds),
            uptime_formatted: format_duration(uptime_seconds),
            downtime_formatted: format_duration(downtime_seconds),
            scaling_formatted: format_duration(scaling_seconds),
            total_seconds,
            window_start,
            window_end,
        })
    }

    pub async fn current_state_duration(&self, tenant_id: i64) -> Result<CurrentStateDuration> {
        self.current_state_duration_at(tenant_id, Utc::now()).await
    }

    pub async fn current_state_duration_at(
        &self,
        tenant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CurrentStateDuration> {
        self.ensure_tenant(tenant_id).await?;

        let Some(latest) = self.store.last_transition(tenant_id).await? else {
            return Ok(CurrentStateDuration {
                current_state: TenantState::Unknown,
                duration_seconds: 0,
                duration_formatted: format_duration(0),
                state_since: None,
                changed_by: None,
            });
        };

        let duration_seconds = (now - latest.changed_at).num_seconds().max(0);
        Ok(CurrentStateDuration {
            current_state: latest.new_state,
            duration_seconds,
            duration_formatted: format_duration(duration_seconds),
            state_since: Some(latest.changed_at),
            changed_by: Some(latest.changed_by),
        })
    }

    /// Transitions inside the optional bounds, newest first.
    pub async fn state_history(
        &self,
        tenant_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TenantStateTransition>> {
        self.ensure_tenant(tenant_id).await?;
        self.store.transitions_between(tenant_id, start, end, limit).await
    }
}
