//! Persistence for tenants, schedules, transitions and audit rows
//!
//! [`Store`] is the seam to whatever storage engine backs the operator.
//! [`StateStore`] keeps every row in redb, JSON-encoded, either in a file or
//! in memory. Each mutation runs in a single write transaction, so a failed
//! write leaves nothing behind and readers never see a half-applied change.

use crate::controllers::NewTransition;
use crate::error::{OperatorError, Result};
use crate::model::{
    AuditEntry, NewAuditEntry, NewSchedule, NewTenant, ScheduledAction, Tenant,
    TenantStateTransition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Persistence operations the operator depends on
#[async_trait]
pub trait Store: Send + Sync {
    // Tenants
    async fn get_tenant(&self, id: i64) -> Result<Option<Tenant>>;
    async fn find_tenant_by_namespace(&self, namespace: &str) -> Result<Option<Tenant>>;
    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant>;
    async fn update_tenant(&self, tenant: &Tenant) -> Result<()>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    // Schedules
    async fn insert_schedule(&self, schedule: NewSchedule) -> Result<ScheduledAction>;
    async fn get_schedule(&self, id: i64) -> Result<Option<ScheduledAction>>;
    async fn update_schedule(&self, schedule: &ScheduledAction) -> Result<()>;
    /// Returns whether the schedule existed.
    async fn delete_schedule(&self, id: i64) -> Result<bool>;
    async fn list_schedules(&self, tenant_id: Option<i64>) -> Result<Vec<ScheduledAction>>;
    /// Persist the outcome of one fire. Returns whether the schedule still exists.
    async fn record_schedule_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        status: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;
    async fn set_schedule_next_run(&self, id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<bool>;

    // Transitions (append-only)
    async fn append_transition(&self, transition: NewTransition) -> Result<TenantStateTransition>;
    async fn last_transition(&self, tenant_id: i64) -> Result<Option<TenantStateTransition>>;
    /// All transitions with `changed_at <= end`, oldest first.
    async fn transitions_until(
        &self,
        tenant_id: i64,
        end: DateTime<Utc>,
    ) -> Result<Vec<TenantStateTransition>>;
    /// Transitions inside the optional bounds, newest first, at most `limit`.
    async fn transitions_between(
        &self,
        tenant_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TenantStateTransition>>;

    // Audit (append-only)
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry>;
    /// Newest first, at most `limit`.
    async fn list_audit(&self, tenant_id: Option<i64>, limit: usize) -> Result<Vec<AuditEntry>>;
}

type RowTable = TableDefinition<'static, i64, &'static [u8]>;

/// Tenants keyed by id.
const TENANTS: RowTable = TableDefinition::new("tenants");

/// Namespace to tenant id; enforces one tenant per namespace.
const TENANT_NAMESPACES: TableDefinition<&str, i64> = TableDefinition::new("tenant_namespaces");

/// Schedules keyed by id.
const SCHEDULES: RowTable = TableDefinition::new("schedules");

/// Transitions keyed by `(tenant_id, changed_at in microseconds, id)`.
const TRANSITIONS: TableDefinition<(i64, i64, i64), &[u8]> = TableDefinition::new("transitions");

/// Audit rows keyed by id, which follows insertion order.
const AUDIT: RowTable = TableDefinition::new("audit");

/// Named counters.
const SEQUENCES: TableDefinition<&str, i64> = TableDefinition::new("sequences");

const ROW_ID_SEQUENCE: &str = "row_id";

/// Wrap a redb error as a storage error with context.
macro_rules! storage_err {
    ($context:literal) => {
        |e| OperatorError::Storage(format!(concat!($context, ": {}"), e))
    };
}

fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(row)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Next value of the shared row id sequence. Rolled back with the transaction.
fn allocate_id(txn: &WriteTransaction) -> Result<i64> {
    let mut table = txn.open_table(SEQUENCES).map_err(storage_err!("open sequences"))?;
    let next = table
        .get(ROW_ID_SEQUENCE)
        .map_err(storage_err!("read sequence"))?
        .map(|guard| guard.value())
        .unwrap_or(0)
        + 1;
    table
        .insert(ROW_ID_SEQUENCE, next)
        .map_err(storage_err!("write sequence"))?;
    Ok(next)
}

fn read_row_in<T: DeserializeOwned>(txn: &WriteTransaction, def: RowTable, id: i64) -> Result<Option<T>> {
    let table = txn.open_table(def).map_err(storage_err!("open table"))?;
    let row = match table.get(id).map_err(storage_err!("read row"))? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(row)
}

fn write_row<T: Serialize>(txn: &WriteTransaction, def: RowTable, id: i64, row: &T) -> Result<()> {
    let bytes = encode(row)?;
    let mut table = txn.open_table(def).map_err(storage_err!("open table"))?;
    table
        .insert(id, bytes.as_slice())
        .map_err(storage_err!("write row"))?;
    Ok(())
}

fn commit(txn: WriteTransaction) -> Result<()> {
    txn.commit().map_err(storage_err!("commit"))
}

/// Range over one tenant's transitions, inclusive of both time bounds.
fn transition_keys(tenant_id: i64, from: i64, to: i64) -> std::ops::RangeInclusive<(i64, i64, i64)> {
    (tenant_id, from, i64::MIN)..=(tenant_id, to, i64::MAX)
}

/// redb-backed [`Store`]
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| {
            OperatorError::Storage(format!("failed to open {}: {}", path.display(), e))
        })?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(path = %path.display(), "State store opened");
        Ok(store)
    }

    /// Create an empty store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(storage_err!("open in-memory database"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err!("begin write"))?;
        txn.open_table(TENANTS).map_err(storage_err!("create table"))?;
        txn.open_table(TENANT_NAMESPACES).map_err(storage_err!("create table"))?;
        txn.open_table(SCHEDULES).map_err(storage_err!("create table"))?;
        txn.open_table(TRANSITIONS).map_err(storage_err!("create table"))?;
        txn.open_table(AUDIT).map_err(storage_err!("create table"))?;
        txn.open_table(SEQUENCES).map_err(storage_err!("create table"))?;
        commit(txn)
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        self.db.begin_write().map_err(storage_err!("begin write"))
    }

    fn get_row<T: DeserializeOwned>(&self, def: RowTable, id: i64) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
        let table = txn.open_table(def).map_err(storage_err!("open table"))?;
        let row = match table.get(id).map_err(storage_err!("read row"))? {
            Some(guard) => Some(decode(guard.value())?),
            None => None,
        };
        Ok(row)
    }

    fn list_rows<T: DeserializeOwned>(&self, def: RowTable) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
        let table = txn.open_table(def).map_err(storage_err!("open table"))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(storage_err!("iterate"))? {
            let (_, value) = entry.map_err(storage_err!("read row"))?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    /// One tenant's transitions with keys in `[from, to]` microseconds, oldest first.
    fn transitions_in(&self, tenant_id: i64, from: i64, to: i64) -> Result<Vec<TenantStateTransition>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
        let table = txn.open_table(TRANSITIONS).map_err(storage_err!("open table"))?;
        let mut rows = Vec::new();
        for entry in table
            .range(transition_keys(tenant_id, from, to))
            .map_err(storage_err!("iterate"))?
        {
            let (_, value) = entry.map_err(storage_err!("read row"))?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    /// Update a schedule in place. Returns whether it exists.
    fn modify_schedule(&self, id: i64, apply: impl FnOnce(&mut ScheduledAction)) -> Result<bool> {
        let txn = self.begin_write()?;
        let Some(mut row) = read_row_in::<ScheduledAction>(&txn, SCHEDULES, id)? else {
            return Ok(false);
        };
        apply(&mut row);
        write_row(&txn, SCHEDULES, id, &row)?;
        commit(txn)?;
        Ok(true)
    }
}

#[async_trait]
impl Store for StateStore {
    async fn get_tenant(&self, id: i64) -> Result<Option<Tenant>> {
        self.get_row(TENANTS, id)
    }

    async fn find_tenant_by_namespace(&self, namespace: &str) -> Result<Option<Tenant>> {
        let id = {
            let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
            let index = txn.open_table(TENANT_NAMESPACES).map_err(storage_err!("open table"))?;
            let id = index
                .get(namespace)
                .map_err(storage_err!("read index"))?
                .map(|guard| guard.value());
            id
        };
        match id {
            Some(id) => self.get_row(TENANTS, id),
            None => Ok(None),
        }
    }

    async fn insert_tenant(&self, tenant: NewTenant) -> Result<Tenant> {
        let txn = self.begin_write()?;
        let now = Utc::now();
        let row = Tenant {
            id: allocate_id(&txn)?,
            name: tenant.name,
            namespace: tenant.namespace,
            description: tenant.description,
            desired_replicas: 1,
            current_replicas: 0,
            last_scaled_at: None,
            last_scaled_by: None,
            created_at: now,
            updated_at: now,
        };
        {
            let mut index = txn.open_table(TENANT_NAMESPACES).map_err(storage_err!("open table"))?;
            let taken = index
                .insert(row.namespace.as_str(), row.id)
                .map_err(storage_err!("write index"))?
                .is_some();
            if taken {
                // dropping the transaction discards the id and the index write
                return Err(OperatorError::InvalidState(format!(
                    "tenant for namespace {} already exists",
                    row.namespace
                )));
            }
        }
        write_row(&txn, TENANTS, row.id, &row)?;
        commit(txn)?;
        debug!(tenant_id = row.id, namespace = %row.namespace, "Tenant stored");
        Ok(row)
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        let txn = self.begin_write()?;
        let existing: Tenant = read_row_in(&txn, TENANTS, tenant.id)?
            .ok_or_else(|| OperatorError::NotFound(format!("tenant {}", tenant.id)))?;
        if existing.namespace != tenant.namespace {
            let mut index = txn.open_table(TENANT_NAMESPACES).map_err(storage_err!("open table"))?;
            let taken = index
                .insert(tenant.namespace.as_str(), tenant.id)
                .map_err(storage_err!("write index"))?
                .is_some();
            if taken {
                return Err(OperatorError::InvalidState(format!(
                    "tenant for namespace {} already exists",
                    tenant.namespace
                )));
            }
            index
                .remove(existing.namespace.as_str())
                .map_err(storage_err!("write index"))?;
        }
        let row = Tenant {
            updated_at: Utc::now(),
            ..tenant.clone()
        };
        write_row(&txn, TENANTS, row.id, &row)?;
        commit(txn)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.list_rows(TENANTS)
    }

    async fn insert_schedule(&self, schedule: NewSchedule) -> Result<ScheduledAction> {
        let txn = self.begin_write()?;
        if read_row_in::<Tenant>(&txn, TENANTS, schedule.tenant_id)?.is_none() {
            return Err(OperatorError::NotFound(format!("tenant {}", schedule.tenant_id)));
        }
        let now = Utc::now();
        let row = ScheduledAction {
            id: allocate_id(&txn)?,
            tenant_id: schedule.tenant_id,
            action: schedule.action,
            cron_expression: schedule.cron_expression,
            timezone: schedule.timezone,
            enabled: schedule.enabled,
            description: schedule.description,
            last_run_at: None,
            next_run_at: None,
            last_run_status: None,
            created_by: schedule.created_by,
            created_at: now,
            updated_at: now,
        };
        write_row(&txn, SCHEDULES, row.id, &row)?;
        commit(txn)?;
        Ok(row)
    }

    async fn get_schedule(&self, id: i64) -> Result<Option<ScheduledAction>> {
        self.get_row(SCHEDULES, id)
    }

    async fn update_schedule(&self, schedule: &ScheduledAction) -> Result<()> {
        let updated = self.modify_schedule(schedule.id, |row| {
            *row = ScheduledAction {
                updated_at: Utc::now(),
                ..schedule.clone()
            };
        })?;
        if !updated {
            return Err(OperatorError::NotFound(format!("schedule {}", schedule.id)));
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let txn = self.begin_write()?;
        let existed = {
            let mut table = txn.open_table(SCHEDULES).map_err(storage_err!("open table"))?;
            let removed = table.remove(id).map_err(storage_err!("delete row"))?.is_some();
            removed
        };
        commit(txn)?;
        Ok(existed)
    }

    async fn list_schedules(&self, tenant_id: Option<i64>) -> Result<Vec<ScheduledAction>> {
        let mut rows: Vec<ScheduledAction> = self.list_rows(SCHEDULES)?;
        rows.retain(|s| tenant_id.map_or(true, |id| s.tenant_id == id));
        Ok(rows)
    }

    async fn record_schedule_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        status: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.modify_schedule(id, |row| {
            row.last_run_at = Some(ran_at);
            row.last_run_status = Some(status.to_string());
            if next_run_at.is_some() {
                row.next_run_at = next_run_at;
            }
        })
    }

    async fn set_schedule_next_run(&self, id: i64, next_run_at: Option<DateTime<Utc>>) -> Result<bool> {
        self.modify_schedule(id, |row| row.next_run_at = next_run_at)
    }

    async fn append_transition(&self, transition: NewTransition) -> Result<TenantStateTransition> {
        let txn = self.begin_write()?;
        let row = transition.into_row(allocate_id(&txn)?);
        let bytes = encode(&row)?;
        {
            let mut table = txn.open_table(TRANSITIONS).map_err(storage_err!("open table"))?;
            table
                .insert(
                    (row.tenant_id, row.changed_at.timestamp_micros(), row.id),
                    bytes.as_slice(),
                )
                .map_err(storage_err!("write row"))?;
        }
        commit(txn)?;
        Ok(row)
    }

    async fn last_transition(&self, tenant_id: i64) -> Result<Option<TenantStateTransition>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
        let table = txn.open_table(TRANSITIONS).map_err(storage_err!("open table"))?;
        let last = match table
            .range(transition_keys(tenant_id, i64::MIN, i64::MAX))
            .map_err(storage_err!("iterate"))?
            .next_back()
        {
            Some(entry) => {
                let (_, value) = entry.map_err(storage_err!("read row"))?;
                Some(decode(value.value())?)
            }
            None => None,
        };
        Ok(last)
    }

    async fn transitions_until(
        &self,
        tenant_id: i64,
        end: DateTime<Utc>,
    ) -> Result<Vec<TenantStateTransition>> {
        // keys are truncated to microseconds; the exact bound is applied after decoding
        let mut rows = self.transitions_in(tenant_id, i64::MIN, end.timestamp_micros())?;
        rows.retain(|t| t.changed_at <= end);
        Ok(rows)
    }

    async fn transitions_between(
        &self,
        tenant_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<TenantStateTransition>> {
        let from = start.map_or(i64::MIN, |s| s.timestamp_micros());
        let to = end.map_or(i64::MAX, |e| e.timestamp_micros());
        let mut rows = self.transitions_in(tenant_id, from, to)?;
        rows.retain(|t| start.map_or(true, |s| t.changed_at >= s) && end.map_or(true, |e| t.changed_at <= e));
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        let txn = self.begin_write()?;
        let row = AuditEntry {
            id: allocate_id(&txn)?,
            tenant_id: entry.tenant_id,
            action: entry.action,
            actor: entry.actor,
            success: entry.success,
            error_message: entry.error_message,
            details: entry.details,
            created_at: Utc::now(),
        };
        write_row(&txn, AUDIT, row.id, &row)?;
        commit(txn)?;
        Ok(row)
    }

    async fn list_audit(&self, tenant_id: Option<i64>, limit: usize) -> Result<Vec<AuditEntry>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin read"))?;
        let table = txn.open_table(AUDIT).map_err(storage_err!("open table"))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(storage_err!("iterate"))?.rev() {
            if rows.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(storage_err!("read row"))?;
            let row: AuditEntry = decode(value.value())?;
            if tenant_id.map_or(true, |id| row.tenant_id == Some(id)) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
