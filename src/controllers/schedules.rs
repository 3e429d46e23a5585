//! Schedule registry
//!
//! CRUD over persisted schedules, mirrored into the live job table: enabled
//! schedules are registered with the [`SchedulerService`], disabled or
//! deleted ones are removed from it. Expressions are validated and compiled
//! before anything is stored.

use super::scheduler::{SchedulerService, SchedulerSettings};
use super::tenant::TenantService;
use crate::cron::{parse_timezone, validate_cron_expression, CronTrigger};
use crate::error::{OperatorError, Result};
use crate::model::{
    AuditAction, NewAuditEntry, NewSchedule, ScheduleRequest, ScheduleUpdate, ScheduledAction,
};
use crate::store::Store;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Persisted schedules and their live registrations
pub struct ScheduleRegistry {
    store: Arc<dyn Store>,
    tenants: Arc<TenantService>,
    scheduler: Arc<SchedulerService>,
    default_timezone: String,
    scheduling_enabled: bool,
}

impl ScheduleRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        tenants: Arc<TenantService>,
        scheduler: Arc<SchedulerService>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            store,
            tenants,
            scheduler,
            default_timezone: settings.default_timezone.clone(),
            scheduling_enabled: settings.enabled,
        }
    }

    fn check_trigger(expression: &str, timezone: &str) -> Result<()> {
        validate_cron_expression(expression)?;
        parse_timezone(timezone)?;
        CronTrigger::parse(expression, timezone)?;
        Ok(())
    }

    async fn resolve_tenant(&self, tenant_id: Option<i64>, namespace: Option<&str>) -> Result<i64> {
        match (tenant_id, namespace) {
            (Some(id), _) => self
                .store
                .get_tenant(id)
                .await?
                .map(|t| t.id)
                .ok_or_else(|| OperatorError::NotFound(format!("tenant {}", id))),
            (None, Some(namespace)) => Ok(self.tenants.ensure_tenant(namespace).await?.id),
            (None, None) => Err(OperatorError::Validation(
                "either tenantId or namespace is required".to_string(),
            )),
        }
    }

    /// Register or deregister `schedule` according to its enabled flag and
    /// persist the resulting `next_run_at`.
    async fn sync_registration(&self, mut schedule: ScheduledAction) -> Result<ScheduledAction> {
        let next_run_at = if schedule.enabled && self.scheduling_enabled {
            self.scheduler.register(&schedule).await?
        } else {
            self.scheduler.deregister(schedule.id).await;
            None
        };
        self.store.set_schedule_next_run(schedule.id, next_run_at).await?;
        schedule.next_run_at = next_run_at;
        Ok(schedule)
    }

    async fn audit(&self, entry: NewAuditEntry) {
        if let Err(e) = self.store.append_audit(entry).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    pub async fn create(&self, request: ScheduleRequest, actor: &str) -> Result<ScheduledAction> {
        let expression = request.cron_expression.trim().to_string();
        let timezone = request
            .timezone
            .clone()
            .unwrap_or_else(|| self.default_timezone.clone());
        Self::check_trigger(&expression, &timezone)?;

        let tenant_id = self
            .resolve_tenant(request.tenant_id, request.namespace.as_deref())
            .await?;

        let schedule = self
            .store
            .insert_schedule(NewSchedule {
                tenant_id,
                action: request.action,
                cron_expression: expression,
                timezone,
                enabled: request.enabled,
                description: request.description,
                created_by: Some(actor.to_string()),
            })
            .await?;
        let schedule = self.sync_registration(schedule).await?;

        info!(
            schedule_id = schedule.id,
            tenant_id,
            action = %schedule.action,
            cron = %schedule.cron_expression,
            "Created schedule"
        );
        self.audit(NewAuditEntry::success(
            Some(tenant_id),
            AuditAction::ScheduleCreate,
            actor,
            serde_json::json!({
                "scheduleId": schedule.id,
                "action": schedule.action,
                "cronExpression": schedule.cron_expression,
                "timezone": schedule.timezone,
            }),
        ))
        .await;
        Ok(schedule)
    }

    pub async fn update(&self, id: i64, update: ScheduleUpdate, actor: &str) -> Result<ScheduledAction> {
        let mut schedule = self.get(id).await?;

        if let Some(expression) = &update.cron_expression {
            schedule.cron_expression = expression.trim().to_string();
        }
        if let Some(timezone) = &update.timezone {
            schedule.timezone = timezone.clone();
        }
        if update.cron_expression.is_some() || update.timezone.is_some() {
            Self::check_trigger(&schedule.cron_expression, &schedule.timezone)?;
        }
        if let Some(action) = update.action {
            schedule.action = action;
        }
        if let Some(enabled) = update.enabled {
            schedule.enabled = enabled;
        }
        if let Some(description) = &update.description {
            schedule.description = Some(description.clone());
        }

        self.store.update_schedule(&schedule).await?;
        let schedule = self.sync_registration(schedule).await?;

        info!(schedule_id = id, enabled = schedule.enabled, "Updated schedule");
        self.audit(NewAuditEntry::success(
            Some(schedule.tenant_id),
            AuditAction::ScheduleUpdate,
            actor,
            serde_json::to_value(&update)?,
        ))
        .await;
        Ok(schedule)
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool, actor: &str) -> Result<ScheduledAction> {
        self.update(
            id,
            ScheduleUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
            actor,
        )
        .await
    }

    pub async fn delete(&self, id: i64, actor: &str) -> Result<()> {
        let schedule = self.get(id).await?;
        self.scheduler.deregister(id).await;
        if !self.store.delete_schedule(id).await? {
            return Err(OperatorError::NotFound(format!("schedule {}", id)));
        }

        info!(schedule_id = id, "Deleted schedule");
        self.audit(NewAuditEntry::success(
            Some(schedule.tenant_id),
            AuditAction::ScheduleDelete,
            actor,
            serde_json::json!({ "scheduleId": id }),
        ))
        .await;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<ScheduledAction> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("schedule {}", id)))
    }

    pub async fn list(&self, tenant_id: Option<i64>) -> Result<Vec<ScheduledAction>> {
        self.store.list_schedules(tenant_id).await
    }

    /// Register every enabled schedule. Rows that no longer compile are
    /// logged and left out. Returns the number registered.
    pub async fn load_enabled(&self) -> Result<usize> {
        if !self.scheduling_enabled {
            info!("Scheduling disabled, not loading schedules");
            return Ok(0);
        }

        let mut loaded = 0;
        for schedule in self.store.list_schedules(None).await? {
            if !schedule.enabled {
                continue;
            }
            let id = schedule.id;
            match self.sync_registration(schedule).await {
                Ok(_) => loaded += 1,
                Err(e) => error!(schedule_id = id, error = %e, "Failed to register schedule"),
            }
        }
        info!(count = loaded, "Loaded enabled schedules");
        Ok(loaded)
    }

    /// Create the schedules defined in a JSON file (an array of requests).
    ///
    /// A definition matching an existing schedule of the same tenant is
    /// skipped. Returns the number created.
    pub async fn load_definitions(&self, path: &Path, actor: &str) -> Result<usize> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            OperatorError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        let requests: Vec<ScheduleRequest> = serde_json::from_slice(&bytes).map_err(|e| {
            OperatorError::Configuration(format!("invalid schedule file {}: {}", path.display(), e))
        })?;

        let mut created = 0;
        for request in requests {
            match self.create_unless_present(request, actor).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping schedule definition"),
            }
        }
        info!(path = %path.display(), created, "Loaded schedule definitions");
        Ok(created)
    }

    async fn create_unless_present(&self, request: ScheduleRequest, actor: &str) -> Result<bool> {
        let tenant_id = self
            .resolve_tenant(request.tenant_id, request.namespace.as_deref())
            .await?;
        let timezone = request
            .timezone
            .clone()
            .unwrap_or_else(|| self.default_timezone.clone());
        let expression = request.cron_expression.trim();

        let exists = self.store.list_schedules(Some(tenant_id)).await?.iter().any(|s| {
            s.action == request.action && s.cron_expression == expression && s.timezone == timezone
        });
        if exists {
            return Ok(false);
        }

        self.create(
            ScheduleRequest {
                tenant_id: Some(tenant_id),
                namespace: None,
                ..request
            },
            actor,
        )
        .await?;
        Ok(true)
    }
}
