//! Error types for watchers.

use steward_action::Retryable;
use steward_core::error::StewardError;
use steward_vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The external source could not be reached. Counts against its health.
    #[error("Source {name} unavailable: {message}")]
    Unavailable { name: String, message: String },
    #[error("Service degraded: {0} circuit is open")]
    Degraded(String),
    #[error("Invalid item {id}: {reason}")]
    InvalidItem { id: String, reason: String },
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
}

impl Retryable for WatchError {
    fn is_transient(&self) -> bool {
        matches!(self, WatchError::Unavailable { .. })
    }

    fn degraded(service: &str) -> Self {
        WatchError::Degraded(service.to_string())
    }
}

impl From<WatchError> for StewardError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Vault(e) => e.into(),
            WatchError::Io(e) => StewardError::Io(e),
            other => StewardError::Orchestration(other.to_string()),
        }
    }
}
