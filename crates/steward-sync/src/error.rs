//! Error types for vault replication.

use std::path::PathBuf;

use steward_core::error::StewardError;
use steward_vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Vault is not a git repository: {0}")]
    NotARepository(PathBuf),
    #[error("git not found on PATH")]
    GitNotFound,
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },
    #[error("git {command} timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SyncError> for StewardError {
    fn from(err: SyncError) -> Self {
        StewardError::Sync(err.to_string())
    }
}
