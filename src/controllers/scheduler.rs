//! Cron engine
//!
//! [`SchedulerService`] holds the live job table of enabled schedules and
//! runs a timer loop over it. Each due fire is handed to a [`FireHandler`] on
//! its own task, so a slow fire never delays the timer or other schedules.
//! [`ScheduleExecutor`] is the handler used in production: it runs the
//! start or stop against the tenant and persists the outcome.
//!
//! Fires that could not run within the misfire grace window of their due
//! time (for example because the process was down) are skipped, never
//! queued. The handler still hears about them so the persisted next run
//! time moves on.

use super::tenant::TenantService;
use super::Controller;
use crate::cron::CronTrigger;
use crate::error::{OperatorError, Result};
use crate::model::{
    run_status, AuditAction, NewAuditEntry, ScheduleAction, ScheduledAction, SCHEDULER_ACTOR,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

/// Default misfire grace window
pub const DEFAULT_MISFIRE_GRACE: Duration = Duration::from_secs(300);

/// Longest the timer sleeps without re-checking the table
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Load schedules and run the timer loop
    pub enabled: bool,
    /// Timezone for schedules created without one
    pub default_timezone: String,
    pub misfire_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timezone: "UTC".to_string(),
            misfire_grace: DEFAULT_MISFIRE_GRACE,
        }
    }
}

/// One invocation of a scheduled action
#[derive(Debug, Clone, PartialEq)]
pub struct Fire {
    pub schedule_id: i64,
    pub tenant_id: i64,
    pub action: ScheduleAction,
    /// Due time this fire stands for
    pub scheduled_at: DateTime<Utc>,
    /// Occurrence after this one
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Result of scanning the job table at one instant
#[derive(Debug, Default)]
pub struct DuePoll {
    pub due: Vec<Fire>,
    /// Fires skipped past the grace window
    pub missed: Vec<Fire>,
    /// Earliest upcoming fire across all jobs
    pub next_wakeup: Option<DateTime<Utc>>,
}

/// Receives due fires
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn handle(&self, fire: Fire);

    /// Called instead of `handle` for a fire skipped past the grace window.
    async fn skipped(&self, _fire: Fire) {}
}

#[derive(Debug, Clone)]
struct CronJob {
    schedule_id: i64,
    tenant_id: i64,
    action: ScheduleAction,
    trigger: CronTrigger,
    next_fire: Option<DateTime<Utc>>,
}

/// Live job table and timer loop
pub struct SchedulerService {
    jobs: RwLock<HashMap<i64, CronJob>>,
    handler: Arc<dyn FireHandler>,
    misfire_grace: TimeDelta,
    running: AtomicBool,
    notify: Notify,
}

impl SchedulerService {
    pub fn new(settings: &SchedulerSettings, handler: Arc<dyn FireHandler>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            handler,
            misfire_grace: TimeDelta::from_std(settings.misfire_grace)
                .unwrap_or_else(|_| TimeDelta::seconds(DEFAULT_MISFIRE_GRACE.as_secs() as i64)),
            running: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Add or replace the job for `schedule`. Returns its next fire time.
    pub async fn register(&self, schedule: &ScheduledAction) -> Result<Option<DateTime<Utc>>> {
        self.register_at(schedule, Utc::now()).await
    }

    pub(crate) async fn register_at(
        &self,
        schedule: &ScheduledAction,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let trigger = CronTrigger::parse(&schedule.cron_expression, &schedule.timezone)?;
        let next_fire = trigger.next_after(now);

        let replaced = self
            .jobs
            .write()
            .await
            .insert(
                schedule.id,
                CronJob {
                    schedule_id: schedule.id,
                    tenant_id: schedule.tenant_id,
                    action: schedule.action,
                    trigger,
                    next_fire,
                },
            )
            .is_some();
        self.notify.notify_one();

        info!(
            schedule_id = schedule.id,
            tenant_id = schedule.tenant_id,
            action = %schedule.action,
            cron = %schedule.cron_expression,
            timezone = %schedule.timezone,
            next_fire = ?next_fire,
            replaced,
            "Registered schedule"
        );
        Ok(next_fire)
    }

    /// Remove the job for `schedule_id`. Returns whether it was registered.
    pub async fn deregister(&self, schedule_id: i64) -> bool {
        let removed = self.jobs.write().await.remove(&schedule_id).is_some();
        if removed {
            self.notify.notify_one();
            info!(schedule_id, "Deregistered schedule");
        }
        removed
    }

    pub async fn is_registered(&self, schedule_id: i64) -> bool {
        self.jobs.read().await.contains_key(&schedule_id)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn next_fire_for(&self, schedule_id: i64) -> Option<DateTime<Utc>> {
        self.jobs
            .read()
            .await
            .get(&schedule_id)
            .and_then(|job| job.next_fire)
    }

    /// Collect the fires due at `now` and advance their jobs.
    ///
    /// When several occurrences of one job have passed, only the latest
    /// counts: it fires if it is within the grace window, otherwise it is
    /// reported as missed.
    pub async fn poll_due(&self, now: DateTime<Utc>) -> DuePoll {
        let mut poll = DuePoll::default();
        let mut jobs = self.jobs.write().await;

        for job in jobs.values_mut() {
            let Some(mut due_at) = job.next_fire else {
                continue;
            };
            if due_at <= now {
                while let Some(later) = job.trigger.next_after(due_at).filter(|t| *t <= now) {
                    due_at = later;
                }
                let following = job.trigger.next_after(now);
                let fire = Fire {
                    schedule_id: job.schedule_id,
                    tenant_id: job.tenant_id,
                    action: job.action,
                    scheduled_at: due_at,
                    next_run_at: following,
                };
                if now - due_at > self.misfire_grace {
                    poll.missed.push(fire);
                } else {
                    poll.due.push(fire);
                }
                job.next_fire = following;
            }

            if let Some(next) = job.next_fire {
                if poll.next_wakeup.map_or(true, |w| next < w) {
                    poll.next_wakeup = Some(next);
                }
            }
        }

        poll
    }

    /// Stop the timer loop after its current iteration.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[async_trait]
impl Controller for SchedulerService {
    async fn run(&self) -> std::result::Result<(), OperatorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OperatorError::InvalidState("scheduler already running".to_string()));
        }
        let jobs = self.job_count().await;
        info!(jobs, "Scheduler started");

        while self.running.load(Ordering::SeqCst) {
            let now = Utc::now();
            let poll = self.poll_due(now).await;

            for fire in poll.missed {
                warn!(
                    schedule_id = fire.schedule_id,
                    due_at = %fire.scheduled_at,
                    grace_seconds = self.misfire_grace.num_seconds(),
                    "Skipping fire past misfire grace window"
                );
                let handler = self.handler.clone();
                tokio::spawn(async move {
                    handler.skipped(fire).await;
                });
            }

            for fire in poll.due {
                debug!(schedule_id = fire.schedule_id, scheduled_at = %fire.scheduled_at, "Dispatching fire");
                let handler = self.handler.clone();
                tokio::spawn(async move {
                    handler.handle(fire).await;
                });
            }

            let sleep = poll
                .next_wakeup
                .map(|t| (t - now).to_std().unwrap_or(Duration::from_secs(1)))
                .unwrap_or(MAX_IDLE)
                .min(MAX_IDLE);

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {},
                _ = self.notify.notified() => {},
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scheduler"
    }
}

/// Carries out fires against tenants and persists the outcome
pub struct ScheduleExecutor {
    tenants: Arc<TenantService>,
    store: Arc<dyn Store>,
}

impl ScheduleExecutor {
    pub fn new(tenants: Arc<TenantService>, store: Arc<dyn Store>) -> Self {
        Self { tenants, store }
    }

    async fn execute(&self, fire: &Fire) -> Result<()> {
        let tenant = self
            .store
            .get_tenant(fire.tenant_id)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("tenant {}", fire.tenant_id)))?;

        let outcome = match fire.action {
            ScheduleAction::Start => self.tenants.start_tenant(&tenant.namespace, SCHEDULER_ACTOR).await?,
            ScheduleAction::Stop => self.tenants.stop_tenant(&tenant.namespace, SCHEDULER_ACTOR).await?,
        };

        if outcome.report.is_partial_failure() {
            warn!(
                schedule_id = fire.schedule_id,
                namespace = %tenant.namespace,
                failed = outcome.report.failed(),
                "Scheduled fire completed with failed resources"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl FireHandler for ScheduleExecutor {
    async fn handle(&self, fire: Fire) {
        // the schedule may have been disabled or deleted after dispatch
        match self.store.get_schedule(fire.schedule_id).await {
            Ok(Some(schedule)) if schedule.enabled => {}
            Ok(_) => {
                debug!(schedule_id = fire.schedule_id, "Schedule gone or disabled, skipping fire");
                return;
            }
            Err(e) => {
                error!(schedule_id = fire.schedule_id, error = %e, "Failed to load schedule for fire");
                return;
            }
        }

        info!(
            schedule_id = fire.schedule_id,
            tenant_id = fire.tenant_id,
            action = %fire.action,
            scheduled_at = %fire.scheduled_at,
            "Executing scheduled action"
        );

        let result = self.execute(&fire).await;
        let status = match &result {
            Ok(()) => run_status(Ok(())),
            Err(e) => {
                error!(schedule_id = fire.schedule_id, error = %e, "Scheduled action failed");
                run_status(Err(e.to_string().as_str()))
            }
        };

        if let Err(e) = self
            .store
            .record_schedule_run(fire.schedule_id, Utc::now(), &status, fire.next_run_at)
            .await
        {
            error!(schedule_id = fire.schedule_id, error = %e, "Failed to persist schedule run");
        }

        let details = serde_json::json!({
            "scheduleId": fire.schedule_id,
            "action": fire.action,
            "scheduledAt": fire.scheduled_at,
        });
        let entry = match &result {
            Ok(()) => NewAuditEntry::success(Some(fire.tenant_id), AuditAction::ScheduleExecute, SCHEDULER_ACTOR, details),
            Err(e) => NewAuditEntry::failure(
                Some(fire.tenant_id),
                AuditAction::ScheduleExecute,
                SCHEDULER_ACTOR,
                &e.to_string(),
                details,
            ),
        };
        if let Err(e) = self.store.append_audit(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    async fn skipped(&self, fire: Fire) {
        match self.store.set_schedule_next_run(fire.schedule_id, fire.next_run_at).await {
            Ok(true) => debug!(
                schedule_id = fire.schedule_id,
                next_run_at = ?fire.next_run_at,
                "Advanced next run past skipped fire"
            ),
            Ok(false) => debug!(schedule_id = fire.schedule_id, "Skipped fire for deleted schedule"),
            Err(e) => error!(schedule_id = fire.schedule_id, error = %e, "Failed to persist next run time"),
        }
    }
}
