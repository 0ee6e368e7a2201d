//! Error types for the vault.

use steward_core::error::StewardError;
use steward_core::types::TaskState;

/// Errors from parsing a record header.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Record has no header")]
    MissingHeader,
    #[error("Record header is not terminated")]
    UnterminatedHeader,
    #[error("Malformed header line {line}: {text}")]
    MalformedLine { line: usize, text: String },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors from vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    #[error("Destination occupied: {id} already in {state}")]
    Occupied { id: String, state: TaskState },
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("Failed to parse record {id}: {source}")]
    Codec {
        id: String,
        #[source]
        source: CodecError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<VaultError> for StewardError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InvalidTransition { from, to } => {
                StewardError::InvalidTransition { from, to }
            }
            VaultError::Io(e) => StewardError::Io(e),
            other => StewardError::Vault(other.to_string()),
        }
    }
}
