//! Append-only audit log.
//!
//! One JSON-lines file per calendar day under `Logs/<zone>/<YYYY-MM-DD>.jsonl`.
//! Each zone appends only to its own directory, so replicated logs never
//! produce file-level conflicts.

use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::store::VaultStore;

/// Result column of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub action: String,
    pub zone: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditLogEntry {
    pub fn new(
        task_id: impl Into<String>,
        action: impl ToString,
        zone: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            action: action.to_string(),
            zone: zone.into(),
            result,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Per-day tallies used by reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
}

impl AuditSummary {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.skipped
    }
}

/// Audit writer for one zone.
pub struct AuditLog {
    logs_dir: PathBuf,
    zone: String,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(store: &VaultStore, zone: impl Into<String>) -> Self {
        Self {
            logs_dir: store.logs_dir(),
            zone: zone.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// File the entries of `date` are appended to by this zone.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.logs_dir
            .join(&self.zone)
            .join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one entry to the file of the entry's day.
    pub fn append(&self, entry: &AuditLogEntry) -> Result<(), VaultError> {
        let path = self.path_for(entry.timestamp.date_naive());
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        append_jsonl_line(&path, entry)
    }

    /// Append, logging instead of failing. Used on paths where the record
    /// move has already happened and must not be undone by a log failure.
    pub fn record(&self, entry: AuditLogEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::error!(
                task_id = %entry.task_id,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    /// Entries of `date` from every zone, oldest first.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AuditLogEntry>, VaultError> {
        let file_name = format!("{}.jsonl", date.format("%Y-%m-%d"));
        let zones = match fs::read_dir(&self.logs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for zone_dir in zones {
            let path = zone_dir?.path().join(&file_name);
            if path.is_file() {
                entries.extend(read_entries(&path)?);
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    pub fn summarize(&self, date: NaiveDate) -> Result<AuditSummary, VaultError> {
        let mut summary = AuditSummary::default();
        for entry in self.read_day(date)? {
            match entry.result {
                AuditResult::Success => summary.success += 1,
                AuditResult::Failure => summary.failure += 1,
                AuditResult::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}

fn append_jsonl_line<T: Serialize>(path: &Path, value: &T) -> Result<(), VaultError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(&line)?;
    file.flush()?;
    Ok(())
}

fn read_entries(path: &Path) -> Result<Vec<AuditLogEntry>, VaultError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Skipping malformed audit line"
                );
            }
        }
    }
    Ok(entries)
}
