//! Orchestrator: the record state machine driver.
//!
//! A triage cycle claims `Needs_Action` records into `In_Progress`, asks the
//! reasoning capability what to do, and either completes them, writes an
//! approval request, or leaves them for a later cycle. The approved sweep
//! executes human-approved actions on the executing zone exactly once,
//! guarded by the execution ledger. `claim` is the only serialization point:
//! losing a claim race is a logged no-op.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use steward_core::config::{OrchestratorConfig, StewardConfig};
use steward_core::types::{Action, Capability, TaskKind, TaskState};
use steward_vault::record::{
    format_timestamp, KEY_APPROVAL_REF, KEY_AUTO_APPROVED, KEY_EXECUTED_AT, KEY_FAILURE_REASON,
    KEY_OUTCOME, KEY_SOURCE_TASK, KEY_SUMMARY, RESERVED_KEYS,
};
use steward_vault::{
    AuditLog, AuditLogEntry, AuditResult, Document, ExecutionLedger, LedgerPhase, Outcome,
    TaskRecord, VaultError, VaultStore,
};

use crate::approval::{ApprovalPolicy, ApprovalReason};
use crate::error::{ActionError, ReasoningError, Retryable};
use crate::executor::ExecutorRegistry;
use crate::notify::{LogNotifier, Notification, NotificationKind, Notifier};
use crate::plan::{self, StepPlan};
use crate::reasoning::{self, ReasoningClient};
use crate::retry::RetryHealthMonitor;
use crate::types::{
    CycleReport, Decision, ExecutionRequest, SweepOutcome, SweepReport, TriageOutcome,
};
use crate::zone::ZoneCoordinator;

/// Health-monitor service name of the reasoning capability.
pub const REASONING_SERVICE: &str = "reasoning";

const TRIAGE_AUDIT: &str = "triage";
pub(crate) const ARCHIVE_AUDIT: &str = "archive";
const UNKNOWN_OUTCOME: &str = "execution outcome unknown";
const EXECUTION_DETAIL: &str = "execution_detail";
const APPROVAL_REASON: &str = "approval_reason";
const DUPLICATE_TAG: &str = "duplicate";
/// Decision payload key whose text becomes the approval request body.
const KEY_DRAFT_BODY: &str = "body";

pub struct Orchestrator {
    store: VaultStore,
    audit: AuditLog,
    ledger: ExecutionLedger,
    zone: ZoneCoordinator,
    registry: ExecutorRegistry,
    reasoner: Arc<dyn ReasoningClient>,
    monitor: Arc<RetryHealthMonitor>,
    notifier: Arc<dyn Notifier>,
    policy: ApprovalPolicy,
    config: OrchestratorConfig,
    handbook: Option<PathBuf>,
    goals: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        store: VaultStore,
        zone: ZoneCoordinator,
        registry: ExecutorRegistry,
        reasoner: Arc<dyn ReasoningClient>,
        monitor: Arc<RetryHealthMonitor>,
    ) -> Self {
        monitor.register(REASONING_SERVICE);
        Self {
            audit: AuditLog::new(&store, zone.zone_id()),
            ledger: ExecutionLedger::new(&store),
            store,
            zone,
            registry,
            reasoner,
            monitor,
            notifier: Arc::new(LogNotifier),
            policy: ApprovalPolicy::new(&Default::default()),
            config: OrchestratorConfig::default(),
            handbook: None,
            goals: None,
        }
    }

    /// Orchestrator wired from the full configuration.
    pub fn from_config(
        config: &StewardConfig,
        store: VaultStore,
        registry: ExecutorRegistry,
        reasoner: Arc<dyn ReasoningClient>,
        monitor: Arc<RetryHealthMonitor>,
    ) -> Self {
        let handbook = store.root().join(&config.reasoning.handbook);
        let goals = store.root().join(&config.reasoning.goals);
        Self::new(
            store,
            ZoneCoordinator::from_config(&config.zone),
            registry,
            reasoner,
            monitor,
        )
        .with_config(config.orchestrator.clone())
        .with_policy(ApprovalPolicy::new(&config.approval))
        .with_handbook(handbook)
        .with_goals(goals)
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Rules document prepended to triage prompts when it exists.
    pub fn with_handbook(mut self, path: impl Into<PathBuf>) -> Self {
        self.handbook = Some(path.into());
        self
    }

    /// Business goals document used for content drafts.
    pub fn with_goals(mut self, path: impl Into<PathBuf>) -> Self {
        self.goals = Some(path.into());
        self
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn zone(&self) -> &ZoneCoordinator {
        &self.zone
    }

    pub fn monitor(&self) -> &Arc<RetryHealthMonitor> {
        &self.monitor
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    // =========================================================================
    // Triage
    // =========================================================================

    /// Run one triage cycle over `Needs_Action`, highest priority first.
    pub async fn run_triage_cycle(&self) -> Result<CycleReport, ActionError> {
        let mut report = CycleReport::default();
        if !self.zone.may(Capability::Triage) {
            info!(zone = %self.zone.zone_id(), "Triage skipped: zone policy");
            return Ok(report);
        }

        report.requeued = self.requeue_stale()?;

        for id in self.store.list(TaskState::NeedsAction)? {
            match self.store.claim(&id, TaskState::NeedsAction, TaskState::InProgress) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = %id, "Record claimed by another cycle");
                    report.tally(&TriageOutcome::Lost);
                    continue;
                }
                Err(e @ VaultError::Occupied { .. }) => {
                    warn!(task_id = %id, error = %e, "Cannot claim record");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            report.claimed += 1;

            let outcome = match self.process(&id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Left in In_Progress; the requeue sweep picks it up again.
                    error!(task_id = %id, error = %e, "Triage failed");
                    self.audit_entry(&id, TRIAGE_AUDIT, AuditResult::Failure, Some(e.to_string()));
                    TriageOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.tally(&outcome);
        }

        info!(
            zone = %self.zone.zone_id(),
            claimed = report.claimed,
            completed = report.completed,
            awaiting_approval = report.awaiting_approval,
            auto_approved = report.auto_approved,
            retrying = report.retrying,
            escalated = report.escalated,
            failed = report.failed,
            "Triage cycle finished"
        );
        Ok(report)
    }

    /// Move `In_Progress` records that nobody has touched for
    /// `retry_after_secs` back to `Needs_Action`.
    fn requeue_stale(&self) -> Result<usize, ActionError> {
        let max_age = chrono::Duration::seconds(self.config.retry_after_secs as i64);
        let now = Utc::now();
        let mut requeued = 0;

        for id in self.store.list(TaskState::InProgress)? {
            let last_attempt = self
                .store
                .read_in(TaskState::InProgress, &id)
                .ok()
                .and_then(|r| r.last_attempt());
            let claimed_at = self.store.modified_at(TaskState::InProgress, &id);
            let Some(last_seen) = last_attempt.into_iter().chain(claimed_at).max() else {
                continue;
            };
            if now - last_seen < max_age {
                continue;
            }
            match self.store.claim(&id, TaskState::InProgress, TaskState::NeedsAction) {
                Ok(true) => {
                    info!(task_id = %id, "Requeued stale in-progress record");
                    requeued += 1;
                }
                Ok(false) => {}
                Err(e @ VaultError::Occupied { .. }) => {
                    self.park_duplicate(&id, TaskState::InProgress, &e)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(requeued)
    }

    /// Move a record whose id already exists in its destination folder to
    /// `Conflicts/` so it stops blocking every later cycle.
    fn park_duplicate(&self, id: &str, state: TaskState, cause: &VaultError) {
        warn!(task_id = %id, state = %state, error = %cause, "Duplicate record id");
        let tag = format!("{}-{}", DUPLICATE_TAG, Utc::now().format("%Y%m%dT%H%M%S"));
        if let Err(e) = self.store.quarantine(id, state, &tag) {
            error!(task_id = %id, error = %e, "Cannot quarantine duplicate record");
        }
    }

    async fn process(&self, id: &str) -> Result<TriageOutcome, ActionError> {
        let record = match self.store.read_in(TaskState::InProgress, id) {
            Ok(record) => record,
            Err(VaultError::NotFound(_)) => return Ok(TriageOutcome::Lost),
            Err(VaultError::Codec { source, .. }) => {
                let reason = format!("unreadable record: {}", source);
                return self.fail_unreadable(TaskState::InProgress, id, &reason).map(|moved| {
                    if moved {
                        TriageOutcome::Failed { reason }
                    } else {
                        TriageOutcome::Lost
                    }
                });
            }
            Err(e) => return Err(e.into()),
        };

        if record.attempts() >= self.config.max_attempts {
            return self.escalate(record, "retry limit reached").await;
        }
        if plan::is_complex(&record, self.config.complex_checklist_threshold) {
            return self.run_plan(record).await;
        }

        let handbook = self.handbook_text();
        let prompt = reasoning::triage_prompt(
            handbook.as_deref(),
            &record.render(TaskState::InProgress),
        );
        let completion = match self.reason(&prompt).await {
            Ok(completion) => completion,
            Err(e) => return self.reasoning_failed(record, e).await,
        };
        match reasoning::parse_decision(&completion) {
            Ok(decision) => self.apply_decision(record, decision).await,
            Err(reason) => self.fail(record, &reason),
        }
    }

    /// Apply a triage decision. The approval policy always looks at the
    /// effective action and the record's own fields.
    async fn apply_decision(
        &self,
        mut record: TaskRecord,
        decision: Decision,
    ) -> Result<TriageOutcome, ActionError> {
        let action = if decision.action != Action::None {
            decision.action
        } else {
            record.action
        };
        let draft_body = decision.payload.get(KEY_DRAFT_BODY).cloned();
        for (key, value) in &decision.payload {
            if key == KEY_DRAFT_BODY {
                continue;
            }
            if !RESERVED_KEYS.contains(&key.as_str()) && record.get(key).is_none() {
                record.set(key, value);
            }
        }
        if !decision.summary.is_empty() {
            record.set(KEY_SUMMARY, &decision.summary);
        }

        if action == Action::None {
            return self.complete(record, TRIAGE_AUDIT);
        }

        let reason = self.policy.review(action, &record);
        let approval_id = format!("APPROVAL_{}", record.id);
        let request = self.approval_request(
            &record,
            action,
            &approval_id,
            reason.as_ref(),
            draft_body.as_deref(),
        );
        let target = if reason.is_some() {
            TaskState::PendingApproval
        } else {
            TaskState::Approved
        };
        match self.store.create(target, &request) {
            Ok(()) => {}
            Err(VaultError::AlreadyExists(_)) => {
                debug!(task_id = %record.id, approval_id = %approval_id, "Approval request already written");
            }
            Err(e) => return Err(e.into()),
        }

        record.set(KEY_APPROVAL_REF, &approval_id);
        if !self.move_to_done(&record.id)? {
            return Ok(TriageOutcome::Lost);
        }
        self.store.write(&record)?;
        self.audit_entry(&record.id, TRIAGE_AUDIT, AuditResult::Success, None);

        match reason {
            Some(reason) => {
                info!(
                    task_id = %record.id,
                    approval_id = %approval_id,
                    action = %action,
                    reason = %reason,
                    "Approval requested"
                );
                self.notifier
                    .notify(Notification {
                        kind: NotificationKind::ApprovalRequested,
                        task_id: approval_id.clone(),
                        title: format!("Approval needed: {}", action),
                        message: format!("{} for {} ({})", action, record.id, reason),
                    })
                    .await;
                Ok(TriageOutcome::AwaitingApproval { approval_id })
            }
            None => {
                info!(
                    task_id = %record.id,
                    approval_id = %approval_id,
                    action = %action,
                    "Action auto-approved"
                );
                Ok(TriageOutcome::AutoApproved { approval_id })
            }
        }
    }

    fn approval_request(
        &self,
        source: &TaskRecord,
        action: Action,
        approval_id: &str,
        reason: Option<&ApprovalReason>,
        draft_body: Option<&str>,
    ) -> TaskRecord {
        let mut request = TaskRecord::new(approval_id, TaskKind::ApprovalRequest)
            .with_action(action)
            .with_priority(source.priority)
            .with_zone_origin(self.zone.zone_id())
            .with_field(KEY_SOURCE_TASK, &source.id);
        if let Some(summary) = source.get(KEY_SUMMARY) {
            request.set(KEY_SUMMARY, summary);
        }
        match reason {
            Some(reason) => request.set(APPROVAL_REASON, reason.to_string()),
            None => request.set(KEY_AUTO_APPROVED, "true"),
        }
        let payload = source.payload();
        for (key, value) in &payload {
            if key != KEY_DRAFT_BODY {
                request.set(key, value);
            }
        }
        let body = draft_body
            .or_else(|| payload.get(KEY_DRAFT_BODY).map(String::as_str))
            .unwrap_or_else(|| source.body());
        request.set_body(body);
        request
    }

    // -------------------------------------------------------------------------
    // Multi-step plans
    // -------------------------------------------------------------------------

    /// Drive a complex task through its checklist, one reasoning call per
    /// step, persisting the plan after every step.
    async fn run_plan(&self, mut record: TaskRecord) -> Result<TriageOutcome, ActionError> {
        let mut plan = StepPlan::from_record(&record, self.config.max_plan_iterations);

        if plan.is_empty() {
            plan.tick();
            let prompt = reasoning::planning_prompt(&record.render(TaskState::InProgress));
            let completion = match self.reason(&prompt).await {
                Ok(completion) => completion,
                Err(e) => {
                    plan.persist(&mut record);
                    return self.reasoning_failed(record, e).await;
                }
            };
            let steps = plan::checklist(&completion);
            if steps.is_empty() {
                return self.fail(record, "planning produced no checklist");
            }
            plan.adopt(steps);
            plan.persist(&mut record);
            self.store.write(&record)?;
            info!(task_id = %record.id, steps = plan.steps.len(), "Plan created");
        }

        while let Some((index, step)) = plan.current().map(|(i, s)| (i, s.to_string())) {
            if plan.cap_reached() {
                let reason = format!(
                    "plan aborted after {} iterations with {} steps remaining",
                    plan.iteration,
                    plan.remaining()
                );
                plan.persist(&mut record);
                return self.fail(record, &reason);
            }
            plan.tick();

            let prompt =
                reasoning::step_prompt(&record.render(TaskState::InProgress), index, &step);
            match self.reason(&prompt).await {
                Ok(result) => {
                    plan.complete_step(index);
                    plan.persist(&mut record);
                    let note = result.split_whitespace().collect::<Vec<_>>().join(" ");
                    let mut body = record.body().trim_end().to_string();
                    body.push_str(&format!("\n\n> Step {}: {}\n", index + 1, note));
                    record.set_body(body);
                    self.store.write(&record)?;
                    debug!(task_id = %record.id, step = index + 1, iteration = plan.iteration, "Plan step done");
                }
                Err(e) => {
                    plan.persist(&mut record);
                    return self.reasoning_failed(record, e).await;
                }
            }
        }

        let summary = format!(
            "plan completed: {} steps in {} iterations",
            plan.steps.len(),
            plan.iteration
        );
        if record.action != Action::None {
            // The declared action still goes through the approval gate.
            let decision = Decision {
                summary,
                ..Decision::default()
            };
            return self.apply_decision(record, decision).await;
        }
        record.set(KEY_SUMMARY, summary);
        self.complete(record, TRIAGE_AUDIT)
    }

    // -------------------------------------------------------------------------
    // Terminal moves
    // -------------------------------------------------------------------------

    fn complete(&self, mut record: TaskRecord, audit_action: &str) -> Result<TriageOutcome, ActionError> {
        if !self.move_to_done(&record.id)? {
            return Ok(TriageOutcome::Lost);
        }
        record.set_outcome(Outcome::Success, None);
        self.store.write(&record)?;
        self.audit_entry(&record.id, audit_action, AuditResult::Success, None);
        info!(task_id = %record.id, "Record completed");
        Ok(TriageOutcome::Completed)
    }

    fn fail(&self, mut record: TaskRecord, reason: &str) -> Result<TriageOutcome, ActionError> {
        if !self.move_to_done(&record.id)? {
            return Ok(TriageOutcome::Lost);
        }
        record.set_outcome(Outcome::Failed, Some(reason));
        self.store.write(&record)?;
        self.audit_entry(&record.id, TRIAGE_AUDIT, AuditResult::Failure, Some(reason.to_string()));
        warn!(task_id = %record.id, reason = %reason, "Record failed");
        Ok(TriageOutcome::Failed {
            reason: reason.to_string(),
        })
    }

    async fn escalate(&self, mut record: TaskRecord, reason: &str) -> Result<TriageOutcome, ActionError> {
        if !self.move_to_done(&record.id)? {
            return Ok(TriageOutcome::Lost);
        }
        record.set_outcome(Outcome::Escalated, Some(reason));
        self.store.write(&record)?;
        self.audit_entry(&record.id, TRIAGE_AUDIT, AuditResult::Failure, Some(reason.to_string()));
        warn!(task_id = %record.id, attempts = record.attempts(), reason = %reason, "Record escalated");
        self.notifier
            .notify(Notification {
                kind: NotificationKind::Escalation,
                task_id: record.id.clone(),
                title: format!("Needs attention: {}", record.id),
                message: format!("{} after {} attempts", reason, record.attempts()),
            })
            .await;
        Ok(TriageOutcome::Escalated)
    }

    /// Count a failed reasoning call and leave the record in `In_Progress`,
    /// or escalate once the attempt cap is reached. An open circuit is not
    /// counted against the record.
    async fn reasoning_failed(
        &self,
        mut record: TaskRecord,
        err: ReasoningError,
    ) -> Result<TriageOutcome, ActionError> {
        let counted = !matches!(err, ReasoningError::Degraded(_));
        let attempts = if counted {
            record.attempts() + 1
        } else {
            record.attempts()
        };
        record.set_attempts(attempts);
        record.set_last_attempt(Utc::now());
        match self.store.write(&record) {
            Ok(_) => {}
            Err(VaultError::NotFound(_)) => return Ok(TriageOutcome::Lost),
            Err(e) => return Err(e.into()),
        }
        self.audit_entry(&record.id, TRIAGE_AUDIT, AuditResult::Failure, Some(err.to_string()));

        if counted && attempts >= self.config.max_attempts {
            return self
                .escalate(record, &format!("reasoning failed: {}", err))
                .await;
        }
        warn!(task_id = %record.id, attempts, error = %err, "Reasoning failed, will retry");
        Ok(TriageOutcome::Retrying { attempts })
    }

    /// File a record whose header cannot be read as a failure-flagged Done,
    /// keeping its text.
    fn fail_unreadable(&self, from: TaskState, id: &str, reason: &str) -> Result<bool, ActionError> {
        if !self.store.claim(id, from, TaskState::Done)? {
            return Ok(false);
        }
        let mut doc = match self.store.read_document_in(TaskState::Done, id) {
            Ok(doc) => doc,
            Err(VaultError::Codec { .. }) => {
                let mut doc = Document::new();
                doc.body = self.store.read_text_in(TaskState::Done, id)?;
                doc
            }
            Err(e) => return Err(e.into()),
        };
        doc.set(KEY_OUTCOME, Outcome::Failed.to_string());
        doc.set(KEY_FAILURE_REASON, reason);
        self.store.write_document_in(TaskState::Done, id, &doc)?;
        self.audit_entry(id, TRIAGE_AUDIT, AuditResult::Failure, Some(reason.to_string()));
        warn!(task_id = %id, reason = %reason, "Unreadable record filed as failed");
        Ok(true)
    }

    fn move_to_done(&self, id: &str) -> Result<bool, ActionError> {
        let moved = self.store.claim(id, TaskState::InProgress, TaskState::Done)?;
        if !moved {
            debug!(task_id = %id, "Record already moved");
        }
        Ok(moved)
    }

    pub(crate) async fn reason(&self, prompt: &str) -> Result<String, ReasoningError> {
        let timeout = self.config.reasoning_timeout();
        self.monitor
            .call(REASONING_SERVICE, || async {
                match tokio::time::timeout(timeout, self.reasoner.complete(prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReasoningError::Timeout(timeout.as_secs())),
                }
            })
            .await
    }

    fn handbook_text(&self) -> Option<String> {
        self.handbook
            .as_ref()
            .and_then(|path| fs::read_to_string(path).ok())
    }

    pub(crate) fn goals_text(&self) -> Option<String> {
        self.goals
            .as_ref()
            .and_then(|path| fs::read_to_string(path).ok())
    }

    // =========================================================================
    // Approved and Rejected sweeps
    // =========================================================================

    /// Execute every `Approved` record. Zones without `approve_execute` log
    /// one skip line per record and change nothing.
    pub async fn sweep_approved(&self) -> Result<SweepReport, ActionError> {
        let mut report = SweepReport::default();
        let ids = self.store.list(TaskState::Approved)?;

        if !self.zone.may(Capability::ApproveExecute) {
            for id in &ids {
                info!(task_id = %id, zone = %self.zone.zone_id(), "skipped: zone policy");
            }
            report.skipped = ids.len();
            return Ok(report);
        }

        for id in ids {
            match self.execute_approved(&id).await {
                Ok(outcome) => report.tally(outcome),
                Err(e) => {
                    error!(task_id = %id, error = %e, "Approved record not processed");
                    report.failed += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                zone = %self.zone.zone_id(),
                executed = report.executed,
                dry_run = report.dry_run,
                failed = report.failed,
                deferred = report.deferred,
                already_handled = report.already_handled,
                "Approved sweep finished"
            );
        }
        Ok(report)
    }

    async fn execute_approved(&self, id: &str) -> Result<SweepOutcome, ActionError> {
        let mut record = match self.store.read_in(TaskState::Approved, id) {
            Ok(record) => record,
            Err(VaultError::NotFound(_)) => return Ok(SweepOutcome::AlreadyHandled),
            Err(VaultError::Codec { source, .. }) => {
                let reason = format!("unreadable record: {}", source);
                return Ok(if self.fail_unreadable(TaskState::Approved, id, &reason)? {
                    SweepOutcome::Failed
                } else {
                    SweepOutcome::AlreadyHandled
                });
            }
            Err(e) => return Err(e.into()),
        };
        let action = record.action;

        if let Some(entry) = self.ledger.get(id)? {
            return match entry.phase {
                LedgerPhase::Completed => {
                    if self.store.claim(id, TaskState::Approved, TaskState::Done)? {
                        record.set_outcome(Outcome::Success, None);
                        let executed_at = entry.finished_at.unwrap_or(entry.started_at);
                        record.set(KEY_EXECUTED_AT, format_timestamp(executed_at));
                        self.store.write(&record)?;
                        info!(task_id = %id, "Executed record moved to Done");
                    }
                    Ok(SweepOutcome::AlreadyHandled)
                }
                LedgerPhase::Failed => {
                    let reason = entry.detail.unwrap_or_else(|| "execution failed".to_string());
                    self.archive_failed(record, &reason)
                }
                LedgerPhase::Started => {
                    let stale = chrono::Duration::seconds(self.config.execution_stale_secs as i64);
                    if !entry.is_stale(stale, Utc::now()) {
                        debug!(task_id = %id, "Execution in progress elsewhere");
                        return Ok(SweepOutcome::AlreadyHandled);
                    }
                    self.ledger.fail(id, UNKNOWN_OUTCOME)?;
                    let outcome = self.archive_failed(record, UNKNOWN_OUTCOME)?;
                    self.notifier
                        .notify(Notification {
                            kind: NotificationKind::Escalation,
                            task_id: id.to_string(),
                            title: format!("Check execution of {}", id),
                            message: format!("{} for {}: verify by hand", UNKNOWN_OUTCOME, action),
                        })
                        .await;
                    Ok(outcome)
                }
            };
        }

        if !self.ledger.begin(id, action, self.zone.zone_id())? {
            debug!(task_id = %id, "Execution already reserved");
            return Ok(SweepOutcome::AlreadyHandled);
        }

        let request = ExecutionRequest {
            task_id: id.to_string(),
            action,
            payload: record.payload(),
            body: record.body().to_string(),
            dry_run: self.registry.is_dry_run(),
        };

        match self.registry.execute(&self.monitor, &request).await {
            Ok(result) => {
                self.ledger.complete(id, result.detail.as_deref())?;
                if !self.store.claim(id, TaskState::Approved, TaskState::Done)? {
                    warn!(task_id = %id, "Executed record vanished before it could be archived");
                    return Ok(SweepOutcome::AlreadyHandled);
                }
                let outcome = if result.dry_run {
                    Outcome::DryRun
                } else {
                    Outcome::Success
                };
                record.set_outcome(outcome, None);
                record.set(KEY_EXECUTED_AT, format_timestamp(Utc::now()));
                if let Some(detail) = &result.detail {
                    record.set(EXECUTION_DETAIL, detail);
                }
                self.store.write(&record)?;
                self.audit_entry(id, action, AuditResult::Success, None);
                info!(task_id = %id, action = %action, dry_run = result.dry_run, "Approved action executed");
                Ok(if result.dry_run {
                    SweepOutcome::DryRun
                } else {
                    SweepOutcome::Executed
                })
            }
            Err(e) if e.is_transient() || matches!(e, ActionError::ServiceDegraded(_)) => {
                self.ledger.clear(id)?;
                self.audit_entry(id, action, AuditResult::Failure, Some(e.to_string()));
                warn!(task_id = %id, action = %action, error = %e, "Execution deferred");
                Ok(SweepOutcome::Deferred)
            }
            Err(e) => {
                let reason = e.to_string();
                self.ledger.fail(id, &reason)?;
                self.archive_failed(record, &reason)
            }
        }
    }

    fn archive_failed(&self, mut record: TaskRecord, reason: &str) -> Result<SweepOutcome, ActionError> {
        if !self.store.claim(&record.id, TaskState::Approved, TaskState::Done)? {
            return Ok(SweepOutcome::AlreadyHandled);
        }
        record.set_outcome(Outcome::Failed, Some(reason));
        self.store.write(&record)?;
        self.audit_entry(&record.id, record.action, AuditResult::Failure, Some(reason.to_string()));
        error!(task_id = %record.id, action = %record.action, reason = %reason, "Approved action failed");
        Ok(SweepOutcome::Failed)
    }

    /// Archive human-rejected records into Done without executing anything.
    pub async fn sweep_rejected(&self) -> Result<SweepReport, ActionError> {
        let mut report = SweepReport::default();
        let ids = self.store.list(TaskState::Rejected)?;

        if !self.zone.may(Capability::ApproveExecute) {
            for id in &ids {
                info!(task_id = %id, zone = %self.zone.zone_id(), "skipped: zone policy");
            }
            report.skipped = ids.len();
            return Ok(report);
        }

        for id in ids {
            match self.store.claim(&id, TaskState::Rejected, TaskState::Done) {
                Ok(true) => {}
                Ok(false) => {
                    report.already_handled += 1;
                    continue;
                }
                Err(e @ VaultError::Occupied { .. }) => {
                    self.park_duplicate(&id, TaskState::Rejected, &e);
                    report.failed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            match self.store.read_in(TaskState::Done, &id) {
                Ok(mut record) => {
                    record.set_outcome(Outcome::Rejected, None);
                    self.store.write(&record)?;
                }
                Err(VaultError::Codec { .. }) => {
                    let mut doc = Document::new();
                    doc.body = self.store.read_text_in(TaskState::Done, &id)?;
                    doc.set(KEY_OUTCOME, Outcome::Rejected.to_string());
                    self.store.write_document_in(TaskState::Done, &id, &doc)?;
                }
                Err(e) => return Err(e.into()),
            }
            self.audit_entry(&id, ARCHIVE_AUDIT, AuditResult::Skipped, None);
            info!(task_id = %id, "Rejected record archived");
            report.archived += 1;
        }
        Ok(report)
    }

    pub(crate) fn audit_entry(&self, task_id: &str, action: impl ToString, result: AuditResult, error: Option<String>) {
        let mut entry = AuditLogEntry::new(task_id, action, self.zone.zone_id(), result);
        if let Some(error) = error {
            entry = entry.with_error(error);
        }
        self.audit.record(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::FakeExecutor;
    use crate::notify::testing::RecordingNotifier;
    use crate::reasoning::testing::ScriptedReasoner;
    use async_trait::async_trait;
    use std::time::Duration;
    use steward_core::config::{ApprovalConfig, RetryConfig};
    use steward_core::types::Priority;
    use steward_vault::record::{KEY_ATTEMPTS, KEY_LAST_ATTEMPT};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: VaultStore,
        notifier: Arc<RecordingNotifier>,
        executor: Arc<FakeExecutor>,
    }

    fn monitor() -> Arc<RetryHealthMonitor> {
        Arc::new(RetryHealthMonitor::new(&RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            failure_threshold: 100,
            ..RetryConfig::default()
        }))
    }

    fn build(
        reasoner: ScriptedReasoner,
        capabilities: &[Capability],
        executor: FakeExecutor,
        dry_run: bool,
    ) -> (Harness, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(executor);
        let mut registry = ExecutorRegistry::new(dry_run);
        registry.register(executor.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            ZoneCoordinator::new("local", capabilities.iter().copied()),
            registry,
            Arc::new(reasoner),
            monitor(),
        )
        .with_config(OrchestratorConfig {
            max_attempts: 2,
            ..OrchestratorConfig::default()
        })
        .with_policy(ApprovalPolicy::new(&ApprovalConfig {
            payment_threshold: 100.0,
            known_payees: vec!["ACME Supplies".to_string()],
        }))
        .with_notifier(notifier.clone());
        (
            Harness {
                _dir: dir,
                store,
                notifier,
                executor,
            },
            orchestrator,
        )
    }

    const ALL: &[Capability] = &[Capability::Triage, Capability::Draft, Capability::ApproveExecute];

    fn setup(reply: &str) -> (Harness, Orchestrator) {
        build(
            ScriptedReasoner::always(reply),
            ALL,
            FakeExecutor::new(Action::LinkedinPost),
            false,
        )
    }

    fn email(id: &str) -> TaskRecord {
        TaskRecord::new(id, TaskKind::Email)
            .with_priority(Priority::High)
            .with_field("from", "client@example.com")
            .with_body("Could you send me the invoice?")
    }

    fn approved_post(id: &str) -> TaskRecord {
        TaskRecord::new(id, TaskKind::ApprovalRequest)
            .with_action(Action::LinkedinPost)
            .with_field("content", "We shipped!")
    }

    // ---- triage ----

    #[tokio::test]
    async fn test_triage_without_action_completes() {
        let (h, orch) = setup(r#"{"action": "none", "summary": "Newsletter, no reply needed"}"#);
        h.store.create(TaskState::NeedsAction, &email("EMAIL_1")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        let done = h.store.read_in(TaskState::Done, "EMAIL_1").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Success));
        assert_eq!(done.get(KEY_SUMMARY), Some("Newsletter, no reply needed"));

        let entries = orch.audit().read_day(Utc::now().date_naive()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "triage");
        assert_eq!(entries[0].result, AuditResult::Success);
    }

    #[tokio::test]
    async fn test_email_reply_requires_approval() {
        let (h, orch) = setup(
            r#"{"action": "email_send", "summary": "Send invoice", "payload": {"to": "client@example.com", "subject": "Invoice", "body": "Attached."}}"#,
        );
        h.store.create(TaskState::NeedsAction, &email("EMAIL_2")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.awaiting_approval, 1);

        let request = h.store.read_in(TaskState::PendingApproval, "APPROVAL_EMAIL_2").unwrap();
        assert_eq!(request.kind, TaskKind::ApprovalRequest);
        assert_eq!(request.action, Action::EmailSend);
        assert_eq!(request.get(KEY_SOURCE_TASK), Some("EMAIL_2"));
        assert_eq!(request.get("subject"), Some("Invoice"));
        assert_eq!(request.body(), "Attached.");

        let source = h.store.read_in(TaskState::Done, "EMAIL_2").unwrap();
        assert_eq!(source.get(KEY_APPROVAL_REF), Some("APPROVAL_EMAIL_2"));

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::ApprovalRequested);
    }

    #[tokio::test]
    async fn test_multiline_reply_keeps_line_breaks() {
        let (h, orch) = setup(
            r#"{"action": "email_send", "payload": {"to": "alice@example.com", "subject": "Contract", "body": "Hi Alice,\n\nPlease find it attached.\n\nBest,\nBob", "content": "line one\nline two"}}"#,
        );
        h.store.create(TaskState::NeedsAction, &email("EM_ML")).unwrap();

        orch.run_triage_cycle().await.unwrap();
        let request = h.store.read_in(TaskState::PendingApproval, "APPROVAL_EM_ML").unwrap();
        assert_eq!(request.body(), "Hi Alice,\n\nPlease find it attached.\n\nBest,\nBob");
        assert_eq!(request.get("content"), Some("line one\nline two"));
        assert_eq!(request.get("body"), None);

        let source = h.store.read_in(TaskState::Done, "EM_ML").unwrap();
        assert_eq!(source.body(), "Could you send me the invoice?");
        assert_eq!(source.get("body"), None);
    }

    #[tokio::test]
    async fn test_payment_over_threshold_ignores_reasoning_verdict() {
        let (h, orch) = setup(r#"{"action": "none", "summary": "Looks routine"}"#);
        let payment = TaskRecord::new("PAY_1", TaskKind::AccountingTask)
            .with_action(Action::CreatePayment)
            .with_field("payee", "ACME Supplies")
            .with_field("amount", "$450.00");
        h.store.create(TaskState::NeedsAction, &payment).unwrap();

        orch.run_triage_cycle().await.unwrap();
        let request = h.store.read_in(TaskState::PendingApproval, "APPROVAL_PAY_1").unwrap();
        assert_eq!(request.action, Action::CreatePayment);
        assert!(!request.flag(KEY_AUTO_APPROVED));
        assert!(h.store.list(TaskState::Approved).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_small_invoice_is_auto_approved() {
        let (h, orch) = setup(
            r#"{"action": "create_invoice", "payload": {"customer": "Globex", "amount": "40"}}"#,
        );
        h.store.create(TaskState::NeedsAction, &email("EMAIL_3")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.auto_approved, 1);
        let request = h.store.read_in(TaskState::Approved, "APPROVAL_EMAIL_3").unwrap();
        assert!(request.flag(KEY_AUTO_APPROVED));
        assert_eq!(request.get("customer"), Some("Globex"));
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shorthand_invoice_amount_needs_approval() {
        let (h, orch) = setup(
            r#"{"action": "create_invoice", "payload": {"customer": "Globex", "amount": "5k"}}"#,
        );
        h.store.create(TaskState::NeedsAction, &email("EM_5K")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.awaiting_approval, 1);
        let request = h.store.read_in(TaskState::PendingApproval, "APPROVAL_EM_5K").unwrap();
        assert_eq!(request.get("approval_reason"), Some("amount missing or unreadable"));
        assert!(h.store.list(TaskState::Approved).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_failure_retries_then_escalates() {
        let (h, orch) = build(
            ScriptedReasoner::new(vec![Err(ReasoningError::Failed("exit 1".to_string()))]),
            ALL,
            FakeExecutor::new(Action::EmailSend),
            false,
        );
        h.store.create(TaskState::NeedsAction, &email("EMAIL_4")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.retrying, 1);
        let record = h.store.read_in(TaskState::InProgress, "EMAIL_4").unwrap();
        assert_eq!(record.attempts(), 1);
        assert!(record.last_attempt().is_some());

        // Make the record stale so the next cycle requeues it.
        let mut record = record;
        record.set(KEY_LAST_ATTEMPT, "2020-01-01T00:00:00Z");
        h.store.write(&record).unwrap();
        let path = h.store.state_dir(TaskState::InProgress).join("EMAIL_4.md");
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::UNIX_EPOCH)
            .unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.escalated, 1);

        let done = h.store.read_in(TaskState::Done, "EMAIL_4").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Escalated));
        assert_eq!(done.get(KEY_ATTEMPTS), Some("2"));
        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Escalation);
    }

    #[tokio::test]
    async fn test_fresh_in_progress_record_is_not_requeued() {
        let (h, orch) = setup(r#"{"action": "none"}"#);
        h.store.create(TaskState::NeedsAction, &email("EMAIL_5")).unwrap();
        h.store
            .claim("EMAIL_5", TaskState::NeedsAction, TaskState::InProgress)
            .unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(h.store.locate("EMAIL_5"), Some(TaskState::InProgress));
    }

    fn plant_copy(h: &Harness, state: TaskState, record: &TaskRecord) -> std::path::PathBuf {
        let dir = h.store.state_dir(state);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.md", record.id));
        fs::write(&path, record.render(state)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stale_duplicate_does_not_block_triage() {
        let (h, orch) = setup(r#"{"action": "none"}"#);
        h.store.create(TaskState::NeedsAction, &email("EMAIL_DUP")).unwrap();
        h.store.create(TaskState::NeedsAction, &email("EMAIL_OTHER")).unwrap();
        let stale = email("EMAIL_DUP").with_field(KEY_LAST_ATTEMPT, "2020-01-01T00:00:00Z");
        let path = plant_copy(&h, TaskState::InProgress, &stale);
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::UNIX_EPOCH)
            .unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.completed, 2);
        assert_eq!(h.store.locate("EMAIL_OTHER"), Some(TaskState::Done));
        let conflicts = h.store.list_conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].starts_with("EMAIL_DUP@duplicate-"));
    }

    struct SlowReasoner;

    #[async_trait]
    impl ReasoningClient for SlowReasoner {
        async fn complete(&self, _prompt: &str) -> Result<String, ReasoningError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("{}".to_string())
        }
    }

    #[tokio::test]
    async fn test_reasoning_timeout_leaves_record_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let orch = Orchestrator::new(
            store.clone(),
            ZoneCoordinator::new("local", ALL.iter().copied()),
            ExecutorRegistry::new(false),
            Arc::new(SlowReasoner),
            monitor(),
        )
        .with_config(OrchestratorConfig {
            reasoning_timeout_secs: 1,
            ..OrchestratorConfig::default()
        });
        store.create(TaskState::NeedsAction, &email("EMAIL_6")).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.retrying, 1);
        assert_eq!(store.locate("EMAIL_6"), Some(TaskState::InProgress));
        let health = orch.monitor().get(REASONING_SERVICE).unwrap();
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_failed_not_dropped() {
        let (h, orch) = setup(r#"{"action": "none"}"#);
        fs::write(
            h.store.state_dir(TaskState::NeedsAction).join("BAD_1.md"),
            "---\ntype: email\naction: wire_transfer\n---\nPay now\n",
        )
        .unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        let doc = h.store.read_document_in(TaskState::Done, "BAD_1").unwrap();
        assert_eq!(doc.get(KEY_OUTCOME), Some("failed"));
        assert!(doc.get(KEY_FAILURE_REASON).unwrap().contains("wire_transfer"));
        assert_eq!(doc.body, "Pay now\n");
    }

    #[tokio::test]
    async fn test_headerless_file_keeps_text() {
        let (h, orch) = setup(r#"{"action": "none"}"#);
        fs::write(
            h.store.state_dir(TaskState::NeedsAction).join("RAW_1.md"),
            "just some notes\n",
        )
        .unwrap();

        orch.run_triage_cycle().await.unwrap();
        let doc = h.store.read_document_in(TaskState::Done, "RAW_1").unwrap();
        assert_eq!(doc.get(KEY_OUTCOME), Some("failed"));
        assert_eq!(doc.body, "just some notes\n");
    }

    #[tokio::test]
    async fn test_reasoning_invalid_action_fails_record() {
        let (h, orch) = setup(r#"{"action": "delete_everything"}"#);
        h.store.create(TaskState::NeedsAction, &email("EMAIL_7")).unwrap();
        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        let done = h.store.read_in(TaskState::Done, "EMAIL_7").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Failed));
    }

    #[tokio::test]
    async fn test_zone_without_triage_touches_nothing() {
        let (h, orch) = build(
            ScriptedReasoner::always(r#"{"action": "none"}"#),
            &[Capability::ApproveExecute],
            FakeExecutor::new(Action::EmailSend),
            false,
        );
        h.store.create(TaskState::NeedsAction, &email("EMAIL_8")).unwrap();
        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(h.store.locate("EMAIL_8"), Some(TaskState::NeedsAction));
    }

    #[tokio::test]
    async fn test_triage_visits_high_priority_first() {
        let reasoner = ScriptedReasoner::always(r#"{"action": "none"}"#);
        let (h, orch) = build(reasoner, ALL, FakeExecutor::new(Action::EmailSend), false);
        h.store
            .create(
                TaskState::NeedsAction,
                &TaskRecord::new("LOW", TaskKind::Email).with_priority(Priority::Low),
            )
            .unwrap();
        h.store
            .create(
                TaskState::NeedsAction,
                &TaskRecord::new("CRIT", TaskKind::Email).with_priority(Priority::Critical),
            )
            .unwrap();
        orch.run_triage_cycle().await.unwrap();

        let entries = orch.audit().read_day(Utc::now().date_naive()).unwrap();
        let order: Vec<&str> = entries.iter().map(|e| e.task_id.as_str()).collect();
        assert_eq!(order, vec!["CRIT", "LOW"]);
    }

    // ---- plans ----

    #[tokio::test]
    async fn test_plan_runs_every_step() {
        let (h, orch) = setup("step done");
        let plan = TaskRecord::new("PLAN_1", TaskKind::Plan)
            .with_body("Launch\n\n- [ ] Draft post\n- [ ] Update site\n");
        h.store.create(TaskState::NeedsAction, &plan).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.completed, 1);
        let done = h.store.read_in(TaskState::Done, "PLAN_1").unwrap();
        assert!(done.body().contains("- [x] Draft post"));
        assert!(done.body().contains("- [x] Update site"));
        assert!(done.body().contains("> Step 2: step done"));
        assert_eq!(done.get("plan_iteration"), Some("2"));
    }

    #[tokio::test]
    async fn test_plan_cap_aborts_deterministically() {
        let (h, orch) = setup("step done");
        let plan = TaskRecord::new("PLAN_2", TaskKind::Plan)
            .with_field("plan_max_iterations", "1")
            .with_body("- [ ] One\n- [ ] Two\n- [ ] Three\n");
        h.store.create(TaskState::NeedsAction, &plan).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        let done = h.store.read_in(TaskState::Done, "PLAN_2").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Failed));
        assert!(done.failure_reason().unwrap().contains("2 steps remaining"));
        assert!(done.body().contains("- [x] One"));
    }

    #[tokio::test]
    async fn test_plan_generated_when_missing() {
        let reasoner = ScriptedReasoner::new(vec![
            Ok("- [ ] Gather numbers\n- [ ] Write summary".to_string()),
            Ok("ok".to_string()),
        ]);
        let (h, orch) = build(reasoner, ALL, FakeExecutor::new(Action::EmailSend), false);
        let task = TaskRecord::new("PLAN_3", TaskKind::Other("project".to_string()))
            .with_body("Prepare the quarterly report.");
        h.store.create(TaskState::NeedsAction, &task).unwrap();

        orch.run_triage_cycle().await.unwrap();
        let done = h.store.read_in(TaskState::Done, "PLAN_3").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Success));
        assert!(done.body().contains("## Plan"));
        assert!(done.body().contains("- [x] Write summary"));
    }

    #[tokio::test]
    async fn test_plan_with_declared_payment_still_needs_approval() {
        let (h, orch) = setup("step done");
        let payment = TaskRecord::new("PAY_MS", TaskKind::AccountingTask)
            .with_action(Action::CreatePayment)
            .with_field("payee", "New Vendor Ltd")
            .with_field("amount", "$9,000.00")
            .with_body("Multi-step: check the contract, then pay.\n\n- [ ] Check contract\n- [ ] Confirm bank details\n");
        h.store.create(TaskState::NeedsAction, &payment).unwrap();

        let report = orch.run_triage_cycle().await.unwrap();
        assert_eq!(report.awaiting_approval, 1);

        let request = h.store.read_in(TaskState::PendingApproval, "APPROVAL_PAY_MS").unwrap();
        assert_eq!(request.action, Action::CreatePayment);
        assert_eq!(request.get("amount"), Some("$9,000.00"));
        assert!(h.store.list(TaskState::Approved).unwrap().is_empty());

        let done = h.store.read_in(TaskState::Done, "PAY_MS").unwrap();
        assert_eq!(done.get(KEY_APPROVAL_REF), Some("APPROVAL_PAY_MS"));
        assert!(done.body().contains("- [x] Confirm bank details"));
        assert_eq!(h.executor.calls(), 0);
    }

    // ---- approved sweep ----

    #[tokio::test]
    async fn test_sweep_executes_once() {
        let (h, orch) = setup("");
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P1")).unwrap();

        let first = orch.sweep_approved().await.unwrap();
        let second = orch.sweep_approved().await.unwrap();
        assert_eq!(first.executed, 1);
        assert_eq!(second, SweepReport::default());
        assert_eq!(h.executor.calls(), 1);

        let done = h.store.read_in(TaskState::Done, "APPROVAL_P1").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Success));
        assert!(done.get(KEY_EXECUTED_AT).is_some());
        assert_eq!(done.get(EXECUTION_DETAIL), Some("done APPROVAL_P1"));
    }

    #[tokio::test]
    async fn test_sweep_zone_gating() {
        let (h, orch) = build(
            ScriptedReasoner::always(""),
            &[Capability::Triage, Capability::Draft],
            FakeExecutor::new(Action::LinkedinPost),
            false,
        );
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P2")).unwrap();
        h.store.create(TaskState::Rejected, &approved_post("APPROVAL_P3")).unwrap();

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(orch.sweep_rejected().await.unwrap().skipped, 1);
        assert_eq!(h.executor.calls(), 0);
        assert_eq!(h.store.locate("APPROVAL_P2"), Some(TaskState::Approved));
        assert_eq!(h.store.locate("APPROVAL_P3"), Some(TaskState::Rejected));
    }

    #[tokio::test]
    async fn test_sweep_dry_run() {
        let (h, orch) = build(
            ScriptedReasoner::always(""),
            ALL,
            FakeExecutor::new(Action::LinkedinPost),
            true,
        );
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P4")).unwrap();
        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.dry_run, 1);
        assert_eq!(h.executor.calls(), 0);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_P4").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::DryRun));
    }

    #[tokio::test]
    async fn test_sweep_permanent_failure_is_flagged() {
        let (h, orch) = setup("");
        let invalid = TaskRecord::new("APPROVAL_P5", TaskKind::ApprovalRequest)
            .with_action(Action::LinkedinPost);
        h.store.create(TaskState::Approved, &invalid).unwrap();

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.failed, 1);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_P5").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Failed));
        assert!(done.failure_reason().unwrap().contains("content"));
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_sweep_transient_failure_defers() {
        let (h, orch) = build(
            ScriptedReasoner::always(""),
            ALL,
            FakeExecutor::failing_with(
                Action::LinkedinPost,
                vec![
                    ActionError::transient("fake", "503"),
                    ActionError::transient("fake", "503"),
                    ActionError::transient("fake", "503"),
                ],
            ),
            false,
        );
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P6")).unwrap();

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(h.store.locate("APPROVAL_P6"), Some(TaskState::Approved));

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(h.executor.calls(), 4);
    }

    #[tokio::test]
    async fn test_sweep_stale_started_entry_is_not_reexecuted() {
        let (h, orch) = build(
            ScriptedReasoner::always(""),
            ALL,
            FakeExecutor::new(Action::LinkedinPost),
            false,
        );
        let orch = orch.with_config(OrchestratorConfig {
            execution_stale_secs: 0,
            ..OrchestratorConfig::default()
        });
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P7")).unwrap();
        ExecutionLedger::new(&h.store)
            .begin("APPROVAL_P7", Action::LinkedinPost, "local")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(h.executor.calls(), 0);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_P7").unwrap();
        assert_eq!(done.failure_reason(), Some(UNKNOWN_OUTCOME));
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_completed_entry_moves_without_executing() {
        let (h, orch) = setup("");
        h.store.create(TaskState::Approved, &approved_post("APPROVAL_P8")).unwrap();
        let ledger = ExecutionLedger::new(&h.store);
        ledger.begin("APPROVAL_P8", Action::LinkedinPost, "local").unwrap();
        ledger.complete("APPROVAL_P8", Some("post-1")).unwrap();

        let report = orch.sweep_approved().await.unwrap();
        assert_eq!(report.already_handled, 1);
        assert_eq!(h.executor.calls(), 0);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_P8").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Success));
    }

    #[tokio::test]
    async fn test_rejected_sweep_archives() {
        let (h, orch) = setup("");
        h.store.create(TaskState::Rejected, &approved_post("APPROVAL_P9")).unwrap();

        let report = orch.sweep_rejected().await.unwrap();
        assert_eq!(report.archived, 1);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_P9").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Rejected));
        assert_eq!(h.executor.calls(), 0);

        let entries = orch.audit().read_day(Utc::now().date_naive()).unwrap();
        assert_eq!(entries[0].action, "archive");
        assert_eq!(entries[0].result, AuditResult::Skipped);
    }

    #[tokio::test]
    async fn test_rejected_sweep_survives_duplicate_id() {
        let (h, orch) = setup("");
        h.store.create(TaskState::Rejected, &approved_post("APPROVAL_A")).unwrap();
        h.store.create(TaskState::Rejected, &approved_post("APPROVAL_B")).unwrap();
        plant_copy(&h, TaskState::Done, &approved_post("APPROVAL_A"));

        let report = orch.sweep_rejected().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.archived, 1);
        let done = h.store.read_in(TaskState::Done, "APPROVAL_B").unwrap();
        assert_eq!(done.outcome(), Some(Outcome::Rejected));
        assert!(h.store.list(TaskState::Rejected).unwrap().is_empty());
        assert!(h.store.list_conflicts().unwrap()[0].starts_with("APPROVAL_A@duplicate-"));
    }
}
