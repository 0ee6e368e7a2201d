//! Record lifecycle with validated transitions.
//!
//! Inbox -> Needs_Action -> In_Progress -> Pending_Approval | Done
//! In_Progress -> Needs_Action (requeue of a stale claim)
//! Pending_Approval -> Approved | Rejected (human)
//! Approved -> Done, Rejected -> Done

use crate::error::StewardError;
use crate::types::TaskState;

/// Validate that a move between two state folders is allowed.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), StewardError> {
    let valid = matches!(
        (from, to),
        (TaskState::Inbox, TaskState::NeedsAction)
            | (TaskState::NeedsAction, TaskState::InProgress)
            | (TaskState::InProgress, TaskState::NeedsAction)
            | (TaskState::InProgress, TaskState::PendingApproval)
            | (TaskState::InProgress, TaskState::Done)
            | (TaskState::PendingApproval, TaskState::Approved)
            | (TaskState::PendingApproval, TaskState::Rejected)
            | (TaskState::Approved, TaskState::Done)
            | (TaskState::Rejected, TaskState::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(StewardError::InvalidTransition { from, to })
    }
}
