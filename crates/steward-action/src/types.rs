//! Core types of the action engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use steward_core::types::Action;

// =============================================================================
// Execution
// =============================================================================

/// What an executor receives: the action, the record's payload fields and
/// the free-form body. Serialized as JSON for command executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub action: Action,
    pub payload: BTreeMap<String, String>,
    pub body: String,
    pub dry_run: bool,
}

impl ExecutionRequest {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Result of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub dry_run: bool,
    /// Executor-provided detail such as a message or post id.
    pub detail: Option<String>,
}

// =============================================================================
// Reasoning
// =============================================================================

/// Parsed reasoning output for one record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub action: Action,
    pub summary: String,
    pub payload: BTreeMap<String, String>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one record during a triage cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TriageOutcome {
    /// Handled without side effects; moved to Done.
    Completed,
    /// Approval request written to Pending_Approval.
    AwaitingApproval { approval_id: String },
    /// Unattended action written straight to Approved.
    AutoApproved { approval_id: String },
    /// Reasoning failed; the record stays In_Progress for a later cycle.
    Retrying { attempts: u32 },
    /// Retries exhausted; failure-flagged Done plus a notification.
    Escalated,
    /// Permanent failure; failure-flagged Done.
    Failed { reason: String },
    /// Another actor claimed the record first.
    Lost,
}

/// Tallies of one triage cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub requeued: usize,
    pub claimed: usize,
    pub completed: usize,
    pub awaiting_approval: usize,
    pub auto_approved: usize,
    pub retrying: usize,
    pub escalated: usize,
    pub failed: usize,
    pub lost: usize,
}

impl CycleReport {
    pub fn tally(&mut self, outcome: &TriageOutcome) {
        match outcome {
            TriageOutcome::Completed => self.completed += 1,
            TriageOutcome::AwaitingApproval { .. } => self.awaiting_approval += 1,
            TriageOutcome::AutoApproved { .. } => self.auto_approved += 1,
            TriageOutcome::Retrying { .. } => self.retrying += 1,
            TriageOutcome::Escalated => self.escalated += 1,
            TriageOutcome::Failed { .. } => self.failed += 1,
            TriageOutcome::Lost => self.lost += 1,
        }
    }
}

/// What happened to one Approved record during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Executed,
    DryRun,
    Failed,
    Deferred,
    AlreadyHandled,
}

/// Tallies of an Approved or Rejected sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub executed: usize,
    pub dry_run: usize,
    pub archived: usize,
    pub failed: usize,
    /// Transient failure or open circuit; the record stays for a later sweep.
    pub deferred: usize,
    /// Zone lacks the capability; nothing was touched.
    pub skipped: usize,
    /// Already executed or being executed by another sweep.
    pub already_handled: usize,
}

impl SweepReport {
    pub fn tally(&mut self, outcome: SweepOutcome) {
        match outcome {
            SweepOutcome::Executed => self.executed += 1,
            SweepOutcome::DryRun => self.dry_run += 1,
            SweepOutcome::Failed => self.failed += 1,
            SweepOutcome::Deferred => self.deferred += 1,
            SweepOutcome::AlreadyHandled => self.already_handled += 1,
        }
    }
}

/// Tallies of one draft generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftReport {
    pub created: usize,
    /// Today's draft for the platform already exists.
    pub existing: usize,
    pub failed: usize,
    /// Unknown platform name or zone without the draft capability.
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_request_json() {
        let mut payload = BTreeMap::new();
        payload.insert("to".to_string(), "a@example.com".to_string());
        let request = ExecutionRequest {
            task_id: "APPROVAL_EMAIL_1".to_string(),
            action: Action::EmailSend,
            payload,
            body: "Hello".to_string(),
            dry_run: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action"], "email_send");
        assert_eq!(json["payload"]["to"], "a@example.com");
        assert_eq!(request.field("to"), Some("a@example.com"));
        assert_eq!(request.field("subject"), None);
    }

    #[test]
    fn test_cycle_report_tally() {
        let mut report = CycleReport::default();
        report.tally(&TriageOutcome::Completed);
        report.tally(&TriageOutcome::AwaitingApproval {
            approval_id: "APPROVAL_X".into(),
        });
        report.tally(&TriageOutcome::Retrying { attempts: 1 });
        report.tally(&TriageOutcome::Lost);
        assert_eq!(report.completed, 1);
        assert_eq!(report.awaiting_approval, 1);
        assert_eq!(report.retrying, 1);
        assert_eq!(report.lost, 1);
        assert_eq!(report.failed, 0);
    }
}
