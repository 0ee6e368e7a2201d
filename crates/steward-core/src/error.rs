use thiserror::Error;

use crate::types::TaskState;

/// Top-level error type for steward.
///
/// Subsystem crates define their own error enums and convert into this one
/// at the composition root so `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StewardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for StewardError {
    fn from(err: toml::de::Error) -> Self {
        StewardError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StewardError {
    fn from(err: toml::ser::Error) -> Self {
        StewardError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(err: serde_json::Error) -> Self {
        StewardError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for steward operations.
pub type Result<T> = std::result::Result<T, StewardError>;
