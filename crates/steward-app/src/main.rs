//! Steward application binary - composition root.
//!
//! 1. Resolve configuration (flags > env > config file > defaults)
//! 2. Open the vault and the shared health monitor
//! 3. Wire executors, the reasoning command and the orchestrator
//! 4. Run the selected mode: watchers, a single cycle, the full schedule
//!    with the health server, or one sync round

mod cli;
mod jobs;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use steward_action::{
    CommandExecutor, CommandReasoner, ExecutorRegistry, Orchestrator, RetryHealthMonitor,
    Scheduler,
};
use steward_api::{start_server, AppState};
use steward_core::config::StewardConfig;
use steward_core::error::StewardError;
use steward_core::types::{Action, TaskKind};
use steward_sync::SyncBridge;
use steward_vault::VaultStore;
use steward_watch::{InboxWatcher, SourceWatcher, SpoolSource};

use crate::cli::{CliArgs, Mode};
use crate::jobs::{
    ApprovalJob, BriefingJob, DraftJob, InboxJob, SourceJob, SyncJob, TriageJob, WeeklyReportJob,
};

/// Service name of the spool directory source.
const SPOOL_SOURCE: &str = "spool";

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

/// Load the config file when present, then apply flag and env overrides.
fn resolve_config(args: &CliArgs, path: &Path) -> Result<StewardConfig, StewardError> {
    let base = if path.exists() {
        StewardConfig::load(path)?
    } else {
        StewardConfig::default()
    };
    let zone = args.resolve_zone(&base.zone.id);
    let mut config = base.with_zone(&zone);
    config.general.vault_path = args.resolve_vault(&config.general.vault_path);
    config.general.dry_run = args.resolve_dry_run(config.general.dry_run);
    config.health.port = args.resolve_port(config.health.port);
    Ok(config)
}

fn build_registry(config: &StewardConfig, store: &VaultStore) -> Result<ExecutorRegistry, StewardError> {
    let mut registry = ExecutorRegistry::new(config.general.dry_run);
    let mut names: Vec<&String> = config.executors.keys().collect();
    names.sort();
    for name in names {
        let action: Action = name.parse().map_err(StewardError::Config)?;
        let executor = CommandExecutor::from_config(action, &config.executors[name])?
            .with_working_dir(store.root());
        registry.register(Arc::new(executor));
        tracing::info!(action = %action, "Executor registered");
    }
    Ok(registry)
}

fn build_orchestrator(
    config: &StewardConfig,
    store: &VaultStore,
    monitor: &Arc<RetryHealthMonitor>,
) -> Result<Orchestrator, StewardError> {
    let registry = build_registry(config, store)?;
    for service in registry.services() {
        monitor.register(&service);
    }
    let reasoner = Arc::new(CommandReasoner::from_config(&config.reasoning, store.root()));
    Ok(Orchestrator::from_config(
        config,
        store.clone(),
        registry,
        reasoner,
        Arc::clone(monitor),
    ))
}

/// Register watcher jobs. Returns the inbox watcher so its filesystem
/// event loop can run next to the periodic sweep.
fn watcher_jobs(
    scheduler: &mut Scheduler,
    config: &StewardConfig,
    store: &VaultStore,
    monitor: &Arc<RetryHealthMonitor>,
) -> Option<Arc<InboxWatcher>> {
    let zone = &config.zone.id;
    let inbox = config
        .watchers
        .inbox_enabled
        .then(|| Arc::new(InboxWatcher::new(store.clone(), zone)));
    if let Some(watcher) = &inbox {
        scheduler.add_job(
            Arc::new(InboxJob(Arc::clone(watcher))),
            secs(config.scheduler.inbox_poll_secs),
        );
    }
    if let Some(dir) = &config.watchers.spool_dir {
        let kind = config
            .watchers
            .spool_kind
            .parse::<TaskKind>()
            .unwrap_or_else(|never| match never {});
        let watcher = SourceWatcher::new(
            SpoolSource::new(SPOOL_SOURCE, dir),
            store.clone(),
            Arc::clone(monitor),
            zone,
        )
        .with_default_kind(kind);
        scheduler.add_job(
            Arc::new(SourceJob(watcher)),
            secs(config.scheduler.source_poll_secs),
        );
    }
    inbox
}

/// Run the scheduler until Ctrl-C, with the health server alongside in
/// scheduled mode.
async fn run_scheduler(
    scheduler: Scheduler,
    config: &StewardConfig,
    inbox: Option<Arc<InboxWatcher>>,
    health: Option<AppState>,
) -> Result<(), StewardError> {
    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.notify_one();
        }
    });

    let server_stop = Arc::new(Notify::new());
    let server = health.map(|state| {
        let health_config = config.health.clone();
        let stop = Arc::clone(&server_stop);
        tokio::spawn(async move {
            start_server(&health_config, state, async move { stop.notified().await }).await
        })
    });

    let inbox_stop = Arc::new(Notify::new());
    let inbox_events = inbox.and_then(|watcher| match watcher.watch() {
        Ok(events) => {
            let stop = Arc::clone(&inbox_stop);
            Some(tokio::spawn(async move { watcher.run_until(events, stop).await }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Inbox events unavailable; polling only");
            None
        }
    });

    tracing::info!(jobs = ?scheduler.job_names(), "Scheduler started");
    scheduler.run().await;

    if let Some(events) = inbox_events {
        inbox_stop.notify_one();
        if let Err(e) = events.await {
            tracing::warn!(error = %e, "Inbox event task failed");
        }
    }

    if let Some(server) = server {
        server_stop.notify_one();
        match server.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!(error = %e, "Health server task failed"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config_path = args.resolve_config_path();
    let config = resolve_config(&args, &config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?args.mode,
        zone = %config.zone.id,
        dry_run = config.general.dry_run,
        config = %config_path.display(),
        "Starting steward"
    );
    config.validate()?;

    let store = VaultStore::open(&config.general.vault_path)?;
    tracing::info!(path = %store.root().display(), "Vault opened");
    let monitor = Arc::new(RetryHealthMonitor::new(&config.retry));

    match args.mode {
        Mode::Sync => {
            let bridge = SyncBridge::from_config(store, &config.sync, &config.zone.id);
            let report = bridge.sync_once().await?;
            tracing::info!(report = ?report, "Sync round finished");
        }
        Mode::Watch => {
            let mut scheduler = Scheduler::from_config(&config.scheduler);
            let inbox = watcher_jobs(&mut scheduler, &config, &store, &monitor);
            run_scheduler(scheduler, &config, inbox, None).await?;
        }
        Mode::Once => {
            let orchestrator = build_orchestrator(&config, &store, &monitor)?;
            let cycle = orchestrator.run_triage_cycle().await?;
            let approved = orchestrator.sweep_approved().await?;
            let rejected = orchestrator.sweep_rejected().await?;
            orchestrator.write_dashboard()?;
            tracing::info!(
                cycle = ?cycle,
                approved = ?approved,
                rejected = ?rejected,
                "Single run finished"
            );
        }
        Mode::Scheduled => {
            let orchestrator = Arc::new(build_orchestrator(&config, &store, &monitor)?);
            let intervals = &config.scheduler;
            let mut scheduler = Scheduler::from_config(intervals);
            let inbox = watcher_jobs(&mut scheduler, &config, &store, &monitor);
            scheduler.add_job(
                Arc::new(TriageJob(Arc::clone(&orchestrator))),
                secs(intervals.triage_interval_secs),
            );
            scheduler.add_job(
                Arc::new(ApprovalJob(Arc::clone(&orchestrator))),
                secs(intervals.approval_interval_secs),
            );
            scheduler.add_job(
                Arc::new(DraftJob {
                    orchestrator: Arc::clone(&orchestrator),
                    platforms: config.drafts.platforms.clone(),
                }),
                secs(intervals.draft_interval_secs),
            );
            scheduler.add_job(
                Arc::new(BriefingJob(Arc::clone(&orchestrator))),
                secs(intervals.report_interval_secs),
            );
            scheduler.add_job(
                Arc::new(WeeklyReportJob(Arc::clone(&orchestrator))),
                secs(intervals.weekly_report_interval_secs),
            );
            if config.sync.enabled {
                let bridge = SyncBridge::from_config(store.clone(), &config.sync, &config.zone.id);
                scheduler.add_job(Arc::new(SyncJob(bridge)), secs(config.sync.interval_secs));
            }

            let health = config
                .health
                .enabled
                .then(|| AppState::new(store.clone(), config.zone.id.clone(), Arc::clone(&monitor)));
            run_scheduler(scheduler, &config, inbox, health).await?;
        }
    }

    tracing::info!("Steward stopped");
    Ok(())
}
