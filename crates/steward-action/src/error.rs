//! Error types for the action engine.

use steward_core::error::StewardError;
use steward_core::types::Action;
use steward_vault::VaultError;

/// Errors that may be retried under the health monitor.
///
/// Only transient errors count as service failures; anything else passes
/// through without touching the service's health.
pub trait Retryable {
    fn is_transient(&self) -> bool;
    /// Error returned without attempting the call while a circuit is open.
    fn degraded(service: &str) -> Self;
}

/// Errors from action execution, classified by how the orchestrator reacts.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Network or service hiccup. Retried with backoff; the record stays.
    #[error("Transient failure in {service}: {message}")]
    Transient { service: String, message: String },
    /// Malformed payload or missing field. The record is failure-flagged.
    #[error("Payload validation failed: {0}")]
    PermanentValidation(String),
    /// The service's circuit is open; the call was not attempted.
    #[error("Service degraded: {0} circuit is open")]
    ServiceDegraded(String),
    #[error("Action type not registered: {0}")]
    UnregisteredExecutor(Action),
    #[error("Action execution timed out after {0} seconds")]
    Timeout(u64),
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
}

impl ActionError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        ActionError::Transient {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Failures that must not be retried: the record goes to a
    /// failure-flagged Done.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ActionError::PermanentValidation(_) | ActionError::UnregisteredExecutor(_)
        )
    }
}

impl Retryable for ActionError {
    fn is_transient(&self) -> bool {
        matches!(self, ActionError::Transient { .. } | ActionError::Timeout(_))
    }

    fn degraded(service: &str) -> Self {
        ActionError::ServiceDegraded(service.to_string())
    }
}

impl From<ActionError> for StewardError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Vault(e) => e.into(),
            other => StewardError::Orchestration(other.to_string()),
        }
    }
}

/// Errors from the reasoning capability.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("Reasoning command failed: {0}")]
    Failed(String),
    #[error("Reasoning timed out after {0} seconds")]
    Timeout(u64),
    #[error("Service degraded: {0} circuit is open")]
    Degraded(String),
    #[error("Reasoning is not configured")]
    NotConfigured,
}

impl Retryable for ReasoningError {
    fn is_transient(&self) -> bool {
        matches!(self, ReasoningError::Failed(_) | ReasoningError::Timeout(_))
    }

    fn degraded(service: &str) -> Self {
        ReasoningError::Degraded(service.to_string())
    }
}

/// Errors from the job scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job failed: {0}")]
    Failed(String),
    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl From<ActionError> for SchedulerError {
    fn from(err: ActionError) -> Self {
        SchedulerError::Failed(err.to_string())
    }
}

impl From<VaultError> for SchedulerError {
    fn from(err: VaultError) -> Self {
        SchedulerError::Failed(err.to_string())
    }
}

impl From<StewardError> for SchedulerError {
    fn from(err: StewardError) -> Self {
        SchedulerError::Failed(err.to_string())
    }
}
