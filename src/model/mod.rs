//! Data types shared by the controllers
//!
//! - Persisted rows: `Tenant`, `ScheduledAction`, `TenantStateTransition`, `AuditEntry`
//! - Ephemeral cluster snapshots: `WorkloadResource`

mod audit;
mod schedule;
mod tenant;
mod transition;
mod workload;

pub use audit::{AuditAction, AuditEntry, NewAuditEntry};
pub use schedule::{
    run_status, NewSchedule, ScheduleAction, ScheduleRequest, ScheduleUpdate, ScheduledAction,
    LAST_RUN_STATUS_MAX_LEN, STATUS_SUCCESS,
};
pub use tenant::{NewTenant, Tenant};
pub use transition::{TenantStateTransition, SCHEDULER_ACTOR};
pub use workload::{RestoreHint, WorkloadKind, WorkloadRef, WorkloadResource};
