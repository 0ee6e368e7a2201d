use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a record. Each state is one folder in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Inbox,
    NeedsAction,
    InProgress,
    PendingApproval,
    Approved,
    Rejected,
    Done,
}

impl TaskState {
    /// Every state, in lifecycle order.
    pub const ALL: [TaskState; 7] = [
        TaskState::Inbox,
        TaskState::NeedsAction,
        TaskState::InProgress,
        TaskState::PendingApproval,
        TaskState::Approved,
        TaskState::Rejected,
        TaskState::Done,
    ];

    /// Folder name of this state inside the vault root.
    pub fn folder(&self) -> &'static str {
        match self {
            TaskState::Inbox => "Inbox",
            TaskState::NeedsAction => "Needs_Action",
            TaskState::InProgress => "In_Progress",
            TaskState::PendingApproval => "Pending_Approval",
            TaskState::Approved => "Approved",
            TaskState::Rejected => "Rejected",
            TaskState::Done => "Done",
        }
    }

    /// Resolve a folder name back to its state.
    pub fn from_folder(name: &str) -> Option<TaskState> {
        TaskState::ALL.into_iter().find(|s| s.folder() == name)
    }

    /// Done is the universal sink; nothing leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder())
    }
}

impl FromStr for TaskState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(state) = TaskState::from_folder(s) {
            return Ok(state);
        }
        match s {
            "inbox" => Ok(TaskState::Inbox),
            "needs_action" => Ok(TaskState::NeedsAction),
            "in_progress" => Ok(TaskState::InProgress),
            "pending_approval" => Ok(TaskState::PendingApproval),
            "approved" => Ok(TaskState::Approved),
            "rejected" => Ok(TaskState::Rejected),
            "done" => Ok(TaskState::Done),
            _ => Err(format!("Unknown task state: {}", s)),
        }
    }
}

/// Work priority. Ordered so that `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" | "urgent" => Ok(Priority::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

// =============================================================================
// Record kinds and actions
// =============================================================================

/// What produced a record. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    FileDrop,
    Email,
    SocialDraft,
    AccountingTask,
    ApprovalRequest,
    Plan,
    Briefing,
    Other(String),
}

impl TaskKind {
    /// Kinds that always go through the multi-step plan loop.
    pub fn is_complex(&self) -> bool {
        match self {
            TaskKind::Plan => true,
            TaskKind::Other(name) => matches!(name.as_str(), "multi_step" | "complex" | "project"),
            _ => false,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::FileDrop => write!(f, "file_drop"),
            TaskKind::Email => write!(f, "email"),
            TaskKind::SocialDraft => write!(f, "social_draft"),
            TaskKind::AccountingTask => write!(f, "accounting_task"),
            TaskKind::ApprovalRequest => write!(f, "approval_request"),
            TaskKind::Plan => write!(f, "plan"),
            TaskKind::Briefing => write!(f, "briefing"),
            TaskKind::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for TaskKind {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "file_drop" => TaskKind::FileDrop,
            "email" => TaskKind::Email,
            "social_draft" | "social_post" => TaskKind::SocialDraft,
            "accounting_task" | "accounting" => TaskKind::AccountingTask,
            "approval_request" => TaskKind::ApprovalRequest,
            "plan" => TaskKind::Plan,
            "briefing" => TaskKind::Briefing,
            other => TaskKind::Other(other.to_string()),
        })
    }
}

/// Side-effecting actions a record may ask for.
///
/// The set is closed: an action string that does not parse is a permanent
/// validation failure, never a pass-through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    None,
    EmailSend,
    LinkedinPost,
    FacebookPost,
    TwitterPost,
    InstagramPost,
    CreateInvoice,
    CreatePayment,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::None,
        Action::EmailSend,
        Action::LinkedinPost,
        Action::FacebookPost,
        Action::TwitterPost,
        Action::InstagramPost,
        Action::CreateInvoice,
        Action::CreatePayment,
    ];

    /// Social posting actions.
    pub fn is_post(&self) -> bool {
        matches!(
            self,
            Action::LinkedinPost | Action::FacebookPost | Action::TwitterPost | Action::InstagramPost
        )
    }

    /// Accounting actions that move money or bill a customer.
    pub fn is_financial(&self) -> bool {
        matches!(self, Action::CreateInvoice | Action::CreatePayment)
    }

    /// Posting action for a social platform name.
    pub fn for_platform(platform: &str) -> Option<Action> {
        match platform.to_ascii_lowercase().as_str() {
            "linkedin" => Some(Action::LinkedinPost),
            "facebook" => Some(Action::FacebookPost),
            "twitter" | "x" => Some(Action::TwitterPost),
            "instagram" => Some(Action::InstagramPost),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => write!(f, "none"),
            Action::EmailSend => write!(f, "email_send"),
            Action::LinkedinPost => write!(f, "linkedin_post"),
            Action::FacebookPost => write!(f, "facebook_post"),
            Action::TwitterPost => write!(f, "twitter_post"),
            Action::InstagramPost => write!(f, "instagram_post"),
            Action::CreateInvoice => write!(f, "create_invoice"),
            Action::CreatePayment => write!(f, "create_payment"),
        }
    }
}

impl FromStr for Action {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "general" | "" => Ok(Action::None),
            "email_send" => Ok(Action::EmailSend),
            "linkedin_post" => Ok(Action::LinkedinPost),
            "facebook_post" => Ok(Action::FacebookPost),
            "twitter_post" => Ok(Action::TwitterPost),
            "instagram_post" => Ok(Action::InstagramPost),
            "create_invoice" | "odoo_invoice" => Ok(Action::CreateInvoice),
            "create_payment" | "odoo_payment" => Ok(Action::CreatePayment),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

// =============================================================================
// Zones
// =============================================================================

/// A capability a zone instance may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Claim and classify Needs_Action records.
    Triage,
    /// Generate content drafts for approval.
    Draft,
    /// Execute approved side effects and archive human decisions.
    ApproveExecute,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Triage => write!(f, "triage"),
            Capability::Draft => write!(f, "draft"),
            Capability::ApproveExecute => write!(f, "approve_execute"),
        }
    }
}

impl FromStr for Capability {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triage" => Ok(Capability::Triage),
            "draft" => Ok(Capability::Draft),
            "approve_execute" => Ok(Capability::ApproveExecute),
            _ => Err(format!("Unknown capability: {}", s)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
