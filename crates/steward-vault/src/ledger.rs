//! Execution ledger: one exclusively-created marker per executed record.
//!
//! An entry is created with `create_new` before any executor runs, so a
//! second sweep (or a restart) can never run the same side effect twice.
//! The ledger lives under `.steward/ledger/` and is not replicated.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use steward_core::types::Action;

use crate::error::VaultError;
use crate::store::VaultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerPhase {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task_id: String,
    pub action: Action,
    pub zone: String,
    pub phase: LedgerPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LedgerEntry {
    /// A `started` entry older than `max_age` belongs to a run that never
    /// finished.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.phase == LedgerPhase::Started && now - self.started_at > max_age
    }
}

pub struct ExecutionLedger {
    dir: PathBuf,
}

impl ExecutionLedger {
    pub fn new(store: &VaultStore) -> Self {
        Self {
            dir: store.internal_dir().join("ledger"),
        }
    }

    fn path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    /// Reserve execution of `task_id`. Returns `false` if an entry already
    /// exists in any phase.
    pub fn begin(&self, task_id: &str, action: Action, zone: &str) -> Result<bool, VaultError> {
        fs::create_dir_all(&self.dir)?;
        let entry = LedgerEntry {
            task_id: task_id.to_string(),
            action,
            zone: zone.to_string(),
            phase: LedgerPhase::Started,
            started_at: Utc::now(),
            finished_at: None,
            detail: None,
        };
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(task_id))
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec_pretty(&entry)?)?;
        file.sync_all()?;
        Ok(true)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<LedgerEntry>, VaultError> {
        match fs::read(self.path(task_id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn complete(&self, task_id: &str, detail: Option<&str>) -> Result<(), VaultError> {
        self.finish(task_id, LedgerPhase::Completed, detail)
    }

    pub fn fail(&self, task_id: &str, reason: &str) -> Result<(), VaultError> {
        self.finish(task_id, LedgerPhase::Failed, Some(reason))
    }

    /// Drop the entry so a later sweep may retry. Only used after a failure
    /// that is known to have had no effect.
    pub fn clear(&self, task_id: &str) -> Result<(), VaultError> {
        match fs::remove_file(self.path(task_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn finish(
        &self,
        task_id: &str,
        phase: LedgerPhase,
        detail: Option<&str>,
    ) -> Result<(), VaultError> {
        let mut entry = self
            .get(task_id)?
            .ok_or_else(|| VaultError::NotFound(task_id.to_string()))?;
        entry.phase = phase;
        entry.finished_at = Some(Utc::now());
        entry.detail = detail.map(str::to_string);

        let tmp = self.dir.join(format!(".{}.json.tmp", task_id));
        fs::write(&tmp, serde_json::to_vec_pretty(&entry)?)?;
        fs::rename(&tmp, self.path(task_id))?;
        Ok(())
    }
}
