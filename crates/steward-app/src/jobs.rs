//! Scheduler jobs: thin adapters from the scheduler to the orchestrator,
//! watchers and sync bridge. Each job logs its report and turns errors
//! into `SchedulerError` so one failing run never stops the loop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use steward_action::{Job, Orchestrator, SchedulerError};
use steward_sync::SyncBridge;
use steward_watch::{InboxWatcher, PolledSource, SourceWatcher};

/// Dashboard failures never fail the cycle that triggered the refresh.
fn refresh_dashboard(orchestrator: &Orchestrator) {
    if let Err(e) = orchestrator.write_dashboard() {
        warn!(error = %e, "Dashboard refresh failed");
    }
}

pub struct TriageJob(pub Arc<Orchestrator>);

#[async_trait]
impl Job for TriageJob {
    fn name(&self) -> &str {
        "triage"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let report = self.0.run_triage_cycle().await?;
        debug!(report = ?report, "Triage cycle finished");
        refresh_dashboard(&self.0);
        Ok(())
    }
}

/// Approved sweep followed by the rejected sweep.
pub struct ApprovalJob(pub Arc<Orchestrator>);

#[async_trait]
impl Job for ApprovalJob {
    fn name(&self) -> &str {
        "approval"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let approved = self.0.sweep_approved().await?;
        let rejected = self.0.sweep_rejected().await?;
        debug!(approved = ?approved, rejected = ?rejected, "Approval sweeps finished");
        refresh_dashboard(&self.0);
        Ok(())
    }
}

/// Full inbox sweep; filesystem events handle drops in between.
pub struct InboxJob(pub Arc<InboxWatcher>);

#[async_trait]
impl Job for InboxJob {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let report = self
            .0
            .poll_once()
            .map_err(|e| SchedulerError::Failed(e.to_string()))?;
        if report.claimed + report.wrapped > 0 {
            info!(claimed = report.claimed, wrapped = report.wrapped, "Inbox drops picked up");
        }
        Ok(())
    }
}

pub struct SourceJob<S: PolledSource>(pub SourceWatcher<S>);

#[async_trait]
impl<S: PolledSource + 'static> Job for SourceJob<S> {
    fn name(&self) -> &str {
        self.0.source().name()
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let report = self
            .0
            .poll_once()
            .await
            .map_err(|e| SchedulerError::Failed(e.to_string()))?;
        debug!(source = %self.name(), report = ?report, "Source polled");
        Ok(())
    }
}

pub struct DraftJob {
    pub orchestrator: Arc<Orchestrator>,
    pub platforms: Vec<String>,
}

#[async_trait]
impl Job for DraftJob {
    fn name(&self) -> &str {
        "drafts"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let report = self.orchestrator.generate_drafts(&self.platforms).await?;
        debug!(report = ?report, "Draft generation finished");
        Ok(())
    }
}

/// Today's briefing, rewritten on every run.
pub struct BriefingJob(pub Arc<Orchestrator>);

#[async_trait]
impl Job for BriefingJob {
    fn name(&self) -> &str {
        "briefing"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        self.0.write_briefing(Utc::now().date_naive())?;
        Ok(())
    }
}

/// Weekly summary and CEO briefing for the week ending today.
pub struct WeeklyReportJob(pub Arc<Orchestrator>);

#[async_trait]
impl Job for WeeklyReportJob {
    fn name(&self) -> &str {
        "weekly_report"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        self.0.write_weekly_reports(Utc::now().date_naive())?;
        Ok(())
    }
}

pub struct SyncJob(pub SyncBridge);

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &str {
        "sync"
    }

    async fn run(&self) -> Result<(), SchedulerError> {
        let report = self
            .0
            .sync_once()
            .await
            .map_err(|e| SchedulerError::Failed(e.to_string()))?;
        if !report.conflicts.is_empty() {
            info!(conflicts = report.conflicts.len(), "Sync left records in Conflicts");
        }
        Ok(())
    }
}
