//! Tenant Operator
//!
//! Starts, stops and resizes namespace tenants on demand or on cron
//! schedules, and reconstructs their uptime and downtime from recorded state
//! transitions.
//!
//! ## Workloads
//!
//! - `Deployment` / `StatefulSet`: scaled through the replica count; the
//!   running size is kept in an annotation while stopped
//! - `DaemonSet`: stopped by swapping its node selector for one no node
//!   satisfies; the original selector is kept in an annotation
//!
//! ## Example schedule definitions
//!
//! ```json
//! [
//!   { "namespace": "acme", "action": "stop",  "cronExpression": "0 19 * * 1-5", "timezone": "Europe/Berlin" },
//!   { "namespace": "acme", "action": "start", "cronExpression": "0 7 * * 1-5",  "timezone": "Europe/Berlin" }
//! ]
//! ```

pub mod annotations;
pub mod cluster;
pub mod controllers;
pub mod cron;
pub mod error;
pub mod model;
pub mod state;
pub mod store;

pub use cluster::{ClusterApi, KubeCluster};
pub use controllers::{
    Controller, MetricsEngine, ScaleReport, ScalingOrchestrator, ScheduleExecutor, ScheduleRegistry,
    SchedulerService, SchedulerSettings, TenantService, TransitionRecorder, WorkloadInventory,
};
pub use error::{OperatorError, Result};
pub use state::TenantState;
pub use store::{StateStore, Store};
