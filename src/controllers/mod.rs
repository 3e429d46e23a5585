//! Controllers for the tenant operator
//!
//! Read path: [`WorkloadInventory`] and [`MetricsEngine`]. Write path:
//! [`TenantService`] drives the [`ScalingOrchestrator`] and records every
//! state change through the [`TransitionRecorder`]. [`SchedulerService`]
//! fires persisted schedules managed by the [`ScheduleRegistry`].

mod inventory;
mod metrics;
mod orchestrator;
mod recorder;
mod scheduler;
mod schedules;
mod tenant;

pub use inventory::WorkloadInventory;
pub use metrics::{
    format_duration, integrate, month_window, CurrentStateDuration, DurationSplit, MetricsEngine,
    MonthlyReport, DEFAULT_HISTORY_LIMIT,
};
pub use orchestrator::{ScaleOutcome, ScaleReport, ScalingOrchestrator};
pub use recorder::{NewTransition, TransitionRecorder};
#[cfg(test)]
pub(crate) use recorder::record_state_at;
pub use scheduler::{
    DuePoll, Fire, FireHandler, ScheduleExecutor, SchedulerService, SchedulerSettings,
    DEFAULT_MISFIRE_GRACE,
};
pub use schedules::ScheduleRegistry;
pub use tenant::{
    TenantScaleOutcome, TenantService, TenantStatusSummary, DEFAULT_EXCLUDED_NAMESPACES,
    START_REPLICAS,
};

use crate::error::OperatorError;

/// Common trait for long-running controllers
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Run the controller loop until it is shut down
    async fn run(&self) -> Result<(), OperatorError>;

    /// Get the controller name for logging
    fn name(&self) -> &'static str;
}
