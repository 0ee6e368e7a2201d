//! Social content drafts.
//!
//! Drafts are written straight into `Pending_Approval`: nothing is posted
//! until a human approves it and the executing zone picks it up.

use chrono::Utc;
use tracing::{info, warn};

use steward_core::types::{Action, Capability, Priority, TaskKind, TaskState};
use steward_vault::{AuditResult, TaskRecord, VaultError};

use crate::error::ActionError;
use crate::notify::{Notification, NotificationKind};
use crate::orchestrator::Orchestrator;
use crate::reasoning;
use crate::types::DraftReport;

pub const TWITTER_LIMIT: usize = 280;

pub(crate) const DRAFT_AUDIT: &str = "draft";

impl Orchestrator {
    /// Write today's draft for each platform that does not have one yet.
    pub async fn generate_drafts(&self, platforms: &[String]) -> Result<DraftReport, ActionError> {
        let mut report = DraftReport::default();
        if !self.zone().may(Capability::Draft) {
            info!(zone = %self.zone().zone_id(), "Drafting skipped: zone policy");
            report.skipped = platforms.len();
            return Ok(report);
        }

        let date = Utc::now().format("%Y%m%d").to_string();
        let goals = self.goals_text();

        for platform in platforms {
            let platform = platform.trim().to_ascii_lowercase();
            let Some(action) = Action::for_platform(&platform) else {
                warn!(platform = %platform, "Unknown draft platform");
                report.skipped += 1;
                continue;
            };
            let id = draft_id(&platform, &date);
            if self.store().exists(&id) {
                report.existing += 1;
                continue;
            }

            let limit = (action == Action::TwitterPost).then_some(TWITTER_LIMIT);
            let prompt = reasoning::draft_prompt(goals.as_deref(), &platform, limit);
            let content = match self.reason(&prompt).await {
                Ok(text) => fit_content(&text, limit),
                Err(e) => {
                    warn!(platform = %platform, error = %e, "Draft generation failed");
                    self.audit_entry(&id, DRAFT_AUDIT, AuditResult::Failure, Some(e.to_string()));
                    report.failed += 1;
                    continue;
                }
            };
            if content.is_empty() {
                self.audit_entry(
                    &id,
                    DRAFT_AUDIT,
                    AuditResult::Failure,
                    Some("empty draft".to_string()),
                );
                report.failed += 1;
                continue;
            }

            let record = TaskRecord::new(&id, TaskKind::SocialDraft)
                .with_action(action)
                .with_priority(Priority::Medium)
                .with_zone_origin(self.zone().zone_id())
                .with_field("platform", &platform)
                .with_field("content", &content)
                .with_body(format!("{}\n", content));
            match self.store().create(TaskState::PendingApproval, &record) {
                Ok(()) => {}
                Err(VaultError::AlreadyExists(_)) => {
                    report.existing += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            self.audit_entry(&id, DRAFT_AUDIT, AuditResult::Success, None);
            info!(task_id = %id, platform = %platform, "Draft written for approval");
            self.notifier()
                .notify(Notification {
                    kind: NotificationKind::ApprovalRequested,
                    task_id: id.clone(),
                    title: format!("New {} draft", platform),
                    message: format!("Review {} in Pending_Approval", id),
                })
                .await;
            report.created += 1;
        }
        Ok(report)
    }
}

/// Deterministic per-day draft id.
pub fn draft_id(platform: &str, date: &str) -> String {
    format!("DRAFT_{}_{}", platform, date)
}

/// Trim a completion and cut it to `limit` characters.
pub fn fit_content(text: &str, limit: Option<usize>) -> String {
    let text = text.trim();
    match limit {
        Some(limit) if text.chars().count() > limit => {
            let mut cut: String = text.chars().take(limit.saturating_sub(3)).collect();
            cut = cut.trim_end().to_string();
            cut.push_str("...");
            cut
        }
        _ => text.to_string(),
    }
}
