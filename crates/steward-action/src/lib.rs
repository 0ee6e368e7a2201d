//! Reasoning-driven task processing for Steward.
//!
//! Triage turns `Needs_Action` records into decisions and approval
//! requests; the approved sweep executes them exactly once through
//! pluggable executors, guarded by zone policy and per-service circuit
//! breakers.

pub mod approval;
pub mod drafts;
pub mod error;
pub mod executor;
pub mod notify;
pub mod orchestrator;
pub mod plan;
pub mod reasoning;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod types;
pub mod zone;

pub use approval::{ApprovalPolicy, ApprovalReason};
pub use error::{ActionError, ReasoningError, Retryable, SchedulerError};
pub use executor::{ActionExecutor, CommandExecutor, ExecutorRegistry};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier};
pub use orchestrator::Orchestrator;
pub use plan::StepPlan;
pub use reasoning::{CommandReasoner, ReasoningClient};
pub use retry::{BackoffPolicy, CircuitState, HealthRecord, RetryHealthMonitor};
pub use scheduler::{Job, Scheduler};
pub use types::{
    CycleReport, Decision, DraftReport, ExecutionRequest, ExecutionResult, SweepOutcome,
    SweepReport, TriageOutcome,
};
pub use zone::ZoneCoordinator;
