//! Reports: the daily briefing, the weekly audit with its CEO briefing,
//! and the live dashboard.
//!
//! Briefings live under `Briefings/`: `<date>_Daily.md`, and per ISO week
//! `<year>-W<week>_Weekly.md` plus `<year>-W<week>_CEO_Briefing.md`.
//! `Dashboard.md` at the vault root is refreshed after every cycle.
//! Rewriting a report for the same period replaces it. Only the executing
//! zone writes reports, so replicas never race on the same file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, Utc};
use tracing::info;

use steward_core::types::{Capability, TaskState};
use steward_vault::record::format_timestamp;
use steward_vault::{AuditLogEntry, AuditResult, VaultError};

use crate::drafts::DRAFT_AUDIT;
use crate::error::ActionError;
use crate::orchestrator::{Orchestrator, ARCHIVE_AUDIT};

/// Failures listed individually before the rest are only counted.
const MAX_LISTED_FAILURES: usize = 20;
/// Completed tasks listed in the weekly summary.
const MAX_LISTED_TASKS: usize = 20;
const WEEKLY_AUDIT: &str = "weekly_audit";
pub const DASHBOARD_FILE: &str = "Dashboard.md";

/// Aggregates over the seven days ending on `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyStats {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub entries: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Distinct records with at least one successful step, sorted.
    pub completed: Vec<String>,
    pub action_counts: BTreeMap<String, usize>,
    pub drafts: usize,
    pub rejected: usize,
    pub pending_approvals: Vec<String>,
}

/// Paths of one weekly audit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyReports {
    pub weekly: PathBuf,
    pub ceo: PathBuf,
}

/// `<year>-W<week>` of the ISO week containing `date`.
pub fn iso_week_label(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

fn write_report(path: &Path, text: &str) -> Result<(), ActionError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(VaultError::from)?;
    }
    fs::write(path, text).map_err(VaultError::from)?;
    Ok(())
}

impl Orchestrator {
    fn may_report(&self, report: &str) -> bool {
        let allowed = self.zone().may(Capability::ApproveExecute);
        if !allowed {
            info!(zone = %self.zone().zone_id(), report, "Report skipped: zone policy");
        }
        allowed
    }

    /// Write the briefing for `date`.
    pub fn write_briefing(&self, date: NaiveDate) -> Result<Option<PathBuf>, ActionError> {
        if !self.may_report("daily") {
            return Ok(None);
        }
        let text = self.render_briefing(date)?;
        let path = self
            .store()
            .briefings_dir()
            .join(format!("{}_Daily.md", date.format("%Y-%m-%d")));
        write_report(&path, &text)?;
        info!(path = %path.display(), "Briefing written");
        Ok(Some(path))
    }

    pub fn render_briefing(&self, date: NaiveDate) -> Result<String, ActionError> {
        let store = self.store();
        let entries = self.audit().read_day(date)?;
        let conflicts = store.list_conflicts()?;
        let services = self.monitor().snapshot();

        let mut out = String::new();
        let _ = writeln!(out, "---");
        let _ = writeln!(out, "type: briefing");
        let _ = writeln!(out, "created: {}", format_timestamp(Utc::now()));
        let _ = writeln!(out, "zone_origin: {}", self.zone().zone_id());
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
        let _ = writeln!(out, "# Daily Briefing {}", date.format("%Y-%m-%d"));
        let _ = writeln!(out);

        let _ = writeln!(out, "## Records");
        let _ = writeln!(out);
        let _ = writeln!(out, "| State | Count |");
        let _ = writeln!(out, "|---|---|");
        for state in TaskState::ALL {
            let _ = writeln!(out, "| {} | {} |", state, store.count(state)?);
        }
        let _ = writeln!(out);

        let success = entries.iter().filter(|e| e.result == AuditResult::Success).count();
        let failures: Vec<_> = entries
            .iter()
            .filter(|e| e.result == AuditResult::Failure)
            .collect();
        let skipped = entries.iter().filter(|e| e.result == AuditResult::Skipped).count();
        let _ = writeln!(out, "## Activity");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Succeeded: {}", success);
        let _ = writeln!(out, "- Failed: {}", failures.len());
        let _ = writeln!(out, "- Skipped: {}", skipped);
        if !failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "### Failures");
            let _ = writeln!(out);
            for entry in failures.iter().take(MAX_LISTED_FAILURES) {
                let _ = writeln!(
                    out,
                    "- `{}` {} ({}): {}",
                    entry.task_id,
                    entry.action,
                    entry.zone,
                    entry.error.as_deref().unwrap_or("no detail")
                );
            }
            if failures.len() > MAX_LISTED_FAILURES {
                let _ = writeln!(out, "- ... and {} more", failures.len() - MAX_LISTED_FAILURES);
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Conflicts");
        let _ = writeln!(out);
        if conflicts.is_empty() {
            let _ = writeln!(out, "None.");
        } else {
            for name in &conflicts {
                let _ = writeln!(out, "- {}", name);
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Services");
        let _ = writeln!(out);
        if services.is_empty() {
            let _ = writeln!(out, "No calls recorded.");
        } else {
            let _ = writeln!(out, "| Service | Circuit | Failures | Last error |");
            let _ = writeln!(out, "|---|---|---|---|");
            for record in &services {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    record.service_name,
                    record.circuit,
                    record.consecutive_failures,
                    record.last_error.as_deref().unwrap_or("")
                );
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Weekly audit
    // -------------------------------------------------------------------------

    pub fn weekly_stats(&self, end: NaiveDate) -> Result<WeeklyStats, ActionError> {
        let start = end - Duration::days(6);
        let mut entries: Vec<AuditLogEntry> = Vec::new();
        for day in start.iter_days().take(7) {
            entries.extend(self.audit().read_day(day)?);
        }

        let mut action_counts = BTreeMap::new();
        let mut completed = BTreeSet::new();
        let (mut succeeded, mut failed, mut drafts, mut rejected) = (0, 0, 0, 0);
        for entry in &entries {
            *action_counts.entry(entry.action.clone()).or_insert(0) += 1;
            match entry.result {
                AuditResult::Success => {
                    succeeded += 1;
                    completed.insert(entry.task_id.clone());
                    if entry.action == DRAFT_AUDIT {
                        drafts += 1;
                    }
                }
                AuditResult::Failure => failed += 1,
                AuditResult::Skipped if entry.action == ARCHIVE_AUDIT => rejected += 1,
                AuditResult::Skipped => {}
            }
        }

        Ok(WeeklyStats {
            start,
            end,
            entries: entries.len(),
            succeeded,
            failed,
            completed: completed.into_iter().collect(),
            action_counts,
            drafts,
            rejected,
            pending_approvals: self.store().list(TaskState::PendingApproval)?,
        })
    }

    /// Write the weekly summary and the CEO briefing for the week ending
    /// on `end`.
    pub fn write_weekly_reports(&self, end: NaiveDate) -> Result<Option<WeeklyReports>, ActionError> {
        if !self.may_report("weekly") {
            return Ok(None);
        }
        let stats = self.weekly_stats(end)?;
        let label = iso_week_label(end);
        let dir = self.store().briefings_dir();
        let reports = WeeklyReports {
            weekly: dir.join(format!("{}_Weekly.md", label)),
            ceo: dir.join(format!("{}_CEO_Briefing.md", label)),
        };
        write_report(&reports.weekly, &self.render_weekly(&stats))?;
        write_report(&reports.ceo, &self.render_ceo_briefing(&stats))?;
        self.audit_entry(&label, WEEKLY_AUDIT, AuditResult::Success, None);
        info!(
            week = %label,
            completed = stats.completed.len(),
            pending = stats.pending_approvals.len(),
            "Weekly audit written"
        );
        Ok(Some(reports))
    }

    fn report_header(&self, out: &mut String, kind: &str, stats: &WeeklyStats) {
        let _ = writeln!(out, "---");
        let _ = writeln!(out, "type: {}", kind);
        let _ = writeln!(out, "period: {} to {}", stats.start, stats.end);
        let _ = writeln!(out, "created: {}", format_timestamp(Utc::now()));
        let _ = writeln!(out, "zone_origin: {}", self.zone().zone_id());
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
    }

    pub fn render_weekly(&self, stats: &WeeklyStats) -> String {
        let mut out = String::new();
        self.report_header(&mut out, "weekly_briefing", stats);
        let _ = writeln!(out, "# Weekly Summary {} to {}", stats.start, stats.end);
        let _ = writeln!(out);

        let _ = writeln!(out, "## Overview");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Records completed: {}", stats.completed.len());
        let _ = writeln!(out, "- Audit entries: {}", stats.entries);
        let _ = writeln!(out, "- Succeeded: {}", stats.succeeded);
        let _ = writeln!(out, "- Failed: {}", stats.failed);
        let _ = writeln!(out, "- Drafts created: {}", stats.drafts);
        let _ = writeln!(out);

        let _ = writeln!(out, "## Completed Records");
        let _ = writeln!(out);
        if stats.completed.is_empty() {
            let _ = writeln!(out, "None.");
        }
        for id in stats.completed.iter().take(MAX_LISTED_TASKS) {
            let _ = writeln!(out, "- {}", id);
        }
        if stats.completed.len() > MAX_LISTED_TASKS {
            let _ = writeln!(out, "- ... and {} more", stats.completed.len() - MAX_LISTED_TASKS);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Action Breakdown");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Action | Count |");
        let _ = writeln!(out, "|---|---|");
        let mut counts: Vec<_> = stats.action_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (action, count) in counts {
            let _ = writeln!(out, "| {} | {} |", action, count);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Pending Approvals");
        let _ = writeln!(out);
        if stats.pending_approvals.is_empty() {
            let _ = writeln!(out, "None.");
        }
        for id in &stats.pending_approvals {
            let _ = writeln!(out, "- {}", id);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## Rejected");
        let _ = writeln!(out);
        let _ = writeln!(out, "{} rejected this week.", stats.rejected);
        out
    }

    pub fn render_ceo_briefing(&self, stats: &WeeklyStats) -> String {
        let mut out = String::new();
        self.report_header(&mut out, "ceo_briefing", stats);
        let _ = writeln!(out, "# CEO Briefing {}", iso_week_label(stats.end));
        let _ = writeln!(out);
        let _ = writeln!(out, "## KPIs");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Metric | This Week |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| Records completed | {} |", stats.completed.len());
        let _ = writeln!(out, "| Drafts created | {} |", stats.drafts);
        let _ = writeln!(out, "| Pending approvals | {} |", stats.pending_approvals.len());
        let _ = writeln!(out, "| Rejected actions | {} |", stats.rejected);
        let _ = writeln!(out, "| Failures | {} |", stats.failed);
        let _ = writeln!(out, "| Automated steps | {} |", stats.entries);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Action Items");
        let _ = writeln!(out);
        match stats.pending_approvals.len() {
            0 => {
                let _ = writeln!(out, "- No items pending approval");
            }
            n => {
                let _ = writeln!(out, "- {} items awaiting approval in Pending_Approval/", n);
            }
        }
        if stats.failed > 0 {
            let _ = writeln!(out, "- {} failed steps; see the weekly summary", stats.failed);
        }
        out
    }

    // -------------------------------------------------------------------------
    // Dashboard
    // -------------------------------------------------------------------------

    /// Refresh `Dashboard.md` at the vault root.
    pub fn write_dashboard(&self) -> Result<Option<PathBuf>, ActionError> {
        if !self.may_report("dashboard") {
            return Ok(None);
        }
        let text = self.render_dashboard()?;
        let path = self.store().root().join(DASHBOARD_FILE);
        write_report(&path, &text)?;
        Ok(Some(path))
    }

    pub fn render_dashboard(&self) -> Result<String, ActionError> {
        let store = self.store();
        let mut counts = BTreeMap::new();
        for state in TaskState::ALL {
            counts.insert(state, store.count(state)?);
        }
        let pending = store.list(TaskState::PendingApproval)?;
        let posts_pending = pending
            .iter()
            .filter_map(|id| store.read_in(TaskState::PendingApproval, id).ok())
            .filter(|record| record.action.is_post())
            .count();
        let today = self.audit().summarize(Utc::now().date_naive())?;
        let conflicts = store.list_conflicts()?.len();
        let services = self.monitor().snapshot();

        let mut out = String::new();
        let _ = writeln!(out, "---");
        let _ = writeln!(out, "last_updated: {}", format_timestamp(Utc::now()));
        let _ = writeln!(out, "zone_origin: {}", self.zone().zone_id());
        let _ = writeln!(out, "---");
        let _ = writeln!(out);
        let _ = writeln!(out, "# Dashboard");
        let _ = writeln!(out);
        let _ = writeln!(out, "## Queue");
        let _ = writeln!(out);
        let count = |state: TaskState| counts.get(&state).copied().unwrap_or(0);
        let _ = writeln!(out, "- Needs action: {}", count(TaskState::NeedsAction));
        let _ = writeln!(out, "- In progress: {}", count(TaskState::InProgress));
        let _ = writeln!(out, "- Pending approval: {}", count(TaskState::PendingApproval));
        let _ = writeln!(out, "- Posts pending approval: {}", posts_pending);
        let _ = writeln!(out, "- Approved, awaiting execution: {}", count(TaskState::Approved));
        let _ = writeln!(out, "- Conflicts: {}", conflicts);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Today");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Succeeded: {}", today.success);
        let _ = writeln!(out, "- Failed: {}", today.failure);
        let _ = writeln!(out, "- Skipped: {}", today.skipped);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Services");
        let _ = writeln!(out);
        if services.is_empty() {
            let _ = writeln!(out, "No calls recorded.");
        }
        for record in &services {
            let _ = writeln!(
                out,
                "- {}: {} ({} consecutive failures)",
                record.service_name, record.circuit, record.consecutive_failures
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use crate::reasoning::testing::ScriptedReasoner;
    use crate::retry::RetryHealthMonitor;
    use crate::zone::ZoneCoordinator;
    use std::sync::Arc;
    use steward_core::config::RetryConfig;
    use steward_core::types::TaskKind;
    use steward_vault::{AuditLogEntry, TaskRecord, VaultStore};

    fn orchestrator(capabilities: &[Capability]) -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let orch = Orchestrator::new(
            store,
            ZoneCoordinator::new("local", capabilities.iter().copied()),
            ExecutorRegistry::new(false),
            Arc::new(ScriptedReasoner::always("")),
            Arc::new(RetryHealthMonitor::new(&RetryConfig::default())),
        );
        (dir, orch)
    }

    #[test]
    fn test_briefing_contents() {
        let (_dir, orch) = orchestrator(&[Capability::ApproveExecute]);
        let store = orch.store();
        store
            .create(TaskState::NeedsAction, &TaskRecord::new("A", TaskKind::Email))
            .unwrap();
        store
            .create(TaskState::PendingApproval, &TaskRecord::new("B", TaskKind::Email))
            .unwrap();
        orch.audit()
            .append(&AuditLogEntry::new("A", "triage", "local", AuditResult::Success))
            .unwrap();
        orch.audit()
            .append(
                &AuditLogEntry::new("C", "email_send", "local", AuditResult::Failure)
                    .with_error("smtp down"),
            )
            .unwrap();

        let text = orch.render_briefing(Utc::now().date_naive()).unwrap();
        assert!(text.contains("| Needs_Action | 1 |"));
        assert!(text.contains("| Pending_Approval | 1 |"));
        assert!(text.contains("- Succeeded: 1"));
        assert!(text.contains("- Failed: 1"));
        assert!(text.contains("`C` email_send (local): smtp down"));
        assert!(text.contains("| reasoning | closed | 0 |  |"));
        assert!(text.contains("## Conflicts\n\nNone."));
    }

    #[test]
    fn test_write_briefing_path() {
        let (dir, orch) = orchestrator(&[Capability::ApproveExecute]);
        let date = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();
        let path = orch.write_briefing(date).unwrap().unwrap();
        assert_eq!(path, dir.path().join("Briefings/2026-03-04_Daily.md"));
        assert!(fs::read_to_string(path).unwrap().contains("# Daily Briefing 2026-03-04"));
    }

    #[test]
    fn test_briefing_skipped_without_execution_capability() {
        let (_dir, orch) = orchestrator(&[Capability::Triage]);
        assert!(orch.write_briefing(Utc::now().date_naive()).unwrap().is_none());
    }

    #[test]
    fn test_iso_week_label() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(iso_week_label(date), "2026-W01");
        let date = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        assert_eq!(iso_week_label(date), "2026-W53");
    }

    #[test]
    fn test_weekly_reports() {
        let (dir, orch) = orchestrator(&[Capability::ApproveExecute]);
        let today = Utc::now().date_naive();
        let audit = orch.audit();
        audit
            .append(&AuditLogEntry::new("EMAIL_1", "triage", "local", AuditResult::Success))
            .unwrap();
        audit
            .append(&AuditLogEntry::new("POST_1", "draft", "local", AuditResult::Success))
            .unwrap();
        audit
            .append(&AuditLogEntry::new("APPROVAL_X", "archive", "local", AuditResult::Skipped))
            .unwrap();
        audit
            .append(
                &AuditLogEntry::new("PAY_1", "create_payment", "local", AuditResult::Failure)
                    .with_error("bank offline"),
            )
            .unwrap();
        orch.store()
            .create(TaskState::PendingApproval, &TaskRecord::new("APPROVAL_Y", TaskKind::ApprovalRequest))
            .unwrap();

        let stats = orch.weekly_stats(today).unwrap();
        assert_eq!(stats.start, today - Duration::days(6));
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.completed, vec!["EMAIL_1", "POST_1"]);
        assert_eq!(stats.drafts, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending_approvals, vec!["APPROVAL_Y"]);

        let reports = orch.write_weekly_reports(today).unwrap().unwrap();
        let label = iso_week_label(today);
        assert_eq!(reports.weekly, dir.path().join(format!("Briefings/{}_Weekly.md", label)));
        assert_eq!(reports.ceo, dir.path().join(format!("Briefings/{}_CEO_Briefing.md", label)));

        let weekly = fs::read_to_string(&reports.weekly).unwrap();
        assert!(weekly.contains("type: weekly_briefing"));
        assert!(weekly.contains("- Records completed: 2"));
        assert!(weekly.contains("| create_payment | 1 |"));
        assert!(weekly.contains("- APPROVAL_Y"));
        let ceo = fs::read_to_string(&reports.ceo).unwrap();
        assert!(ceo.contains("| Pending approvals | 1 |"));
        assert!(ceo.contains("1 items awaiting approval"));

        let logged = orch.audit().read_day(today).unwrap();
        assert!(logged.iter().any(|e| e.action == "weekly_audit" && e.task_id == label));
    }

    #[test]
    fn test_dashboard_refresh() {
        let (dir, orch) = orchestrator(&[Capability::ApproveExecute]);
        let store = orch.store();
        store
            .create(TaskState::NeedsAction, &TaskRecord::new("A", TaskKind::Email))
            .unwrap();
        let post = TaskRecord::new("APPROVAL_P", TaskKind::ApprovalRequest)
            .with_action(steward_core::types::Action::LinkedinPost);
        store.create(TaskState::PendingApproval, &post).unwrap();

        let path = orch.write_dashboard().unwrap().unwrap();
        assert_eq!(path, dir.path().join(DASHBOARD_FILE));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("- Needs action: 1"));
        assert!(text.contains("- Pending approval: 1"));
        assert!(text.contains("- Posts pending approval: 1"));
        assert!(text.contains("- reasoning: closed (0 consecutive failures)"));

        store.claim("A", TaskState::NeedsAction, TaskState::InProgress).unwrap();
        orch.write_dashboard().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("- Needs action: 0"));
        assert!(text.contains("- In progress: 1"));
    }

    #[test]
    fn test_weekly_and_dashboard_skipped_without_execution_capability() {
        let (dir, orch) = orchestrator(&[Capability::Triage]);
        assert!(orch.write_weekly_reports(Utc::now().date_naive()).unwrap().is_none());
        assert!(orch.write_dashboard().unwrap().is_none());
        assert!(!dir.path().join(DASHBOARD_FILE).exists());
    }
}
