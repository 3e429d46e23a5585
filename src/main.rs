//! Tenant Operator
//!
//! Runs the schedule engine against the cluster and offers one-shot tenant
//! operations from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Run the scheduler (requires kubeconfig or in-cluster config)
//! tenant-operator --schedules schedules.json --state-file state.redb
//!
//! # Stop a tenant now
//! tenant-operator --state-file state.redb stop acme
//!
//! # Monthly uptime report
//! tenant-operator --state-file state.redb report acme 2026 1
//!
//! # Run with custom log level
//! RUST_LOG=debug tenant-operator
//! ```

use clap::{ArgAction, Parser, Subcommand};
use kube::Client;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tenant_operator::controllers::{
    CurrentStateDuration, MonthlyReport, ScaleReport, TenantScaleOutcome, TenantStatusSummary,
    DEFAULT_HISTORY_LIMIT,
};
use tenant_operator::model::{AuditEntry, ScheduleRequest, ScheduledAction, TenantStateTransition};
use tenant_operator::{
    ClusterApi, Controller, KubeCluster, MetricsEngine, ScalingOrchestrator, ScheduleExecutor,
    ScheduleRegistry, SchedulerService, SchedulerSettings, StateStore, Store, TenantService,
    WorkloadInventory,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tenant Operator
#[derive(Parser, Debug)]
#[command(name = "tenant-operator")]
#[command(version, about = "Scheduled start/stop of namespace tenants with uptime history")]
struct Args {
    /// Load schedules and run the timer loop
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    scheduler_enabled: bool,

    /// IANA timezone for schedules created without one
    #[arg(long, default_value = "UTC")]
    default_timezone: String,

    /// Seconds after its due time a fire may still run
    #[arg(long, default_value_t = 300)]
    misfire_grace_seconds: u64,

    /// Namespace hidden from tenant listings (repeatable)
    #[arg(
        long = "exclude-namespace",
        default_values = ["kube-system", "kube-public", "kube-node-lease"]
    )]
    exclude_namespaces: Vec<String>,

    /// JSON file of schedule definitions to create at startup
    #[arg(long)]
    schedules: Option<PathBuf>,

    /// redb database file for tenants, schedules and history (in memory if unset)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Actor id recorded for operations issued from this process
    #[arg(long, default_value = "tenant-operator-cli")]
    actor: String,

    /// Print the JSON Schemas of the response types and exit
    #[arg(long, default_value = "false")]
    print_schemas: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Start a tenant, restoring stored replica counts
    Start { namespace: String },
    /// Stop a tenant
    Stop { namespace: String },
    /// Scale every workload of a tenant
    Scale { namespace: String, replicas: i32 },
    /// Observed and recorded state of a tenant
    Status { namespace: String },
    /// List tenant namespaces with their observed state
    Tenants,
    /// Monthly uptime/downtime report
    Report { namespace: String, year: i32, month: u32 },
    /// Recent state transitions, newest first
    History {
        namespace: String,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_schemas() -> anyhow::Result<()> {
    let mut schemas = BTreeMap::new();
    schemas.insert("ScaleReport", schemars::schema_for!(ScaleReport));
    schemas.insert("TenantScaleOutcome", schemars::schema_for!(TenantScaleOutcome));
    schemas.insert("TenantStatusSummary", schemars::schema_for!(TenantStatusSummary));
    schemas.insert("TenantStateTransition", schemars::schema_for!(TenantStateTransition));
    schemas.insert("MonthlyReport", schemars::schema_for!(MonthlyReport));
    schemas.insert("CurrentStateDuration", schemars::schema_for!(CurrentStateDuration));
    schemas.insert("ScheduledAction", schemars::schema_for!(ScheduledAction));
    schemas.insert("ScheduleRequest", schemars::schema_for!(ScheduleRequest));
    schemas.insert("AuditEntry", schemars::schema_for!(AuditEntry));
    print_json(&schemas)
}

async fn tenant_id_for(store: &Arc<dyn Store>, namespace: &str) -> anyhow::Result<i64> {
    store
        .find_tenant_by_namespace(namespace)
        .await?
        .map(|t| t.id)
        .ok_or_else(|| anyhow::anyhow!("no tenant recorded for namespace {}", namespace))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let mut args = Args::parse();

    if args.print_schemas {
        return print_schemas();
    }

    let store: Arc<dyn Store> = match &args.state_file {
        Some(path) => Arc::new(StateStore::open(path)?),
        None => Arc::new(StateStore::open_in_memory()?),
    };

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client));
    let orchestrator = Arc::new(ScalingOrchestrator::new(WorkloadInventory::new(cluster)));
    let tenants = Arc::new(
        TenantService::new(orchestrator, store.clone())
            .with_excluded_namespaces(args.exclude_namespaces.clone()),
    );
    let metrics = MetricsEngine::new(store.clone());

    let command = args.command.take().unwrap_or(Command::Run);
    match &command {
        Command::Run => run(&args, store, tenants).await,
        Command::Start { namespace } => print_json(&tenants.start_tenant(namespace, &args.actor).await?),
        Command::Stop { namespace } => print_json(&tenants.stop_tenant(namespace, &args.actor).await?),
        Command::Scale { namespace, replicas } => {
            print_json(&tenants.scale_tenant(namespace, *replicas, &args.actor).await?)
        }
        Command::Status { namespace } => {
            let observed = tenants.observe_namespace(namespace).await?;
            let recorded = match store.find_tenant_by_namespace(namespace).await? {
                Some(tenant) => Some(metrics.current_state_duration(tenant.id).await?),
                None => None,
            };
            print_json(&serde_json::json!({
                "namespace": namespace,
                "observed": observed,
                "recorded": recorded,
            }))
        }
        Command::Tenants => print_json(&tenants.list_tenants().await?),
        Command::Report { namespace, year, month } => {
            let tenant_id = tenant_id_for(&store, namespace).await?;
            print_json(&metrics.monthly_report(tenant_id, *year, *month).await?)
        }
        Command::History { namespace, limit } => {
            let tenant_id = tenant_id_for(&store, namespace).await?;
            print_json(&metrics.state_history(tenant_id, None, None, *limit).await?)
        }
    }
}

async fn run(args: &Args, store: Arc<dyn Store>, tenants: Arc<TenantService>) -> anyhow::Result<()> {
    let settings = SchedulerSettings {
        enabled: args.scheduler_enabled,
        default_timezone: args.default_timezone.clone(),
        misfire_grace: Duration::from_secs(args.misfire_grace_seconds),
    };
    tenant_operator::cron::parse_timezone(&settings.default_timezone)?;

    info!("Starting Tenant Operator");
    info!(
        scheduler_enabled = settings.enabled,
        default_timezone = %settings.default_timezone,
        misfire_grace_seconds = args.misfire_grace_seconds,
        "Scheduler settings"
    );

    let executor = Arc::new(ScheduleExecutor::new(tenants.clone(), store.clone()));
    let scheduler = Arc::new(SchedulerService::new(&settings, executor));
    let registry = ScheduleRegistry::new(store, tenants, scheduler.clone(), &settings);

    if let Some(path) = &args.schedules {
        registry.load_definitions(path, &args.actor).await?;
    }
    registry.load_enabled().await?;

    if !settings.enabled {
        info!("Scheduler disabled, waiting for shutdown signal");
        tokio::signal::ctrl_c().await?;
        info!("Tenant Operator shutting down");
        return Ok(());
    }

    let scheduler_handle = {
        let controller = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(e) = controller.run().await {
                error!("{} controller error: {}", controller.name(), e);
            }
        })
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = scheduler_handle => {
            if let Err(e) = result {
                error!("Scheduler task failed: {}", e);
            }
        }
    }

    scheduler.shutdown();
    info!("Tenant Operator shutting down");
    Ok(())
}
