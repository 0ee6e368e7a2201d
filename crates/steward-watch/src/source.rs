//! Polled external sources.
//!
//! A [`PolledSource`] hands out items that have not been acknowledged yet.
//! [`SourceWatcher`] turns each one into a `Needs_Action` record with an id
//! derived from the item's external id, then acknowledges it. Creating
//! before acknowledging means a crash can only cause a re-delivery, and the
//! deterministic id turns that re-delivery into a no-op.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use steward_action::RetryHealthMonitor;
use steward_core::types::{Priority, TaskKind, TaskState};
use steward_vault::{TaskRecord, VaultError, VaultStore};

use crate::error::WatchError;
use crate::inbox::sanitize;
use crate::priority::classify_email_priority;

/// Longest external-id fragment kept in a record id.
const MAX_ID_FRAGMENT: usize = 40;

/// One item delivered by an external source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceItem {
    /// Stable id assigned by the source, e.g. a message id.
    pub id: String,
    /// Record kind; the source's default when absent.
    pub kind: Option<String>,
    pub subject: String,
    pub from: Option<String>,
    pub labels: Vec<String>,
    pub priority: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    /// Extra header fields copied onto the record.
    pub fields: BTreeMap<String, String>,
    pub body: String,
}

#[async_trait]
pub trait PolledSource: Send + Sync {
    /// Health-monitor service name.
    fn name(&self) -> &str;

    /// Items not yet acknowledged.
    async fn fetch(&self) -> Result<Vec<SourceItem>, WatchError>;

    /// Mark an item as turned into a record.
    async fn ack(&self, item: &SourceItem) -> Result<(), WatchError>;
}

/// Tallies of one source poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub fetched: usize,
    pub created: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

pub struct SourceWatcher<S> {
    source: S,
    store: VaultStore,
    monitor: Arc<RetryHealthMonitor>,
    zone_id: String,
    default_kind: TaskKind,
}

impl<S: PolledSource> SourceWatcher<S> {
    pub fn new(
        source: S,
        store: VaultStore,
        monitor: Arc<RetryHealthMonitor>,
        zone_id: impl Into<String>,
    ) -> Self {
        monitor.register(source.name());
        Self {
            source,
            store,
            monitor,
            zone_id: zone_id.into(),
            default_kind: TaskKind::Email,
        }
    }

    pub fn with_default_kind(mut self, kind: TaskKind) -> Self {
        self.default_kind = kind;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch once through the health monitor and record every new item.
    pub async fn poll_once(&self) -> Result<SourceReport, WatchError> {
        let name = self.source.name().to_string();
        let items = self
            .monitor
            .call(&name, || self.source.fetch())
            .await?;
        let mut report = SourceReport {
            fetched: items.len(),
            ..SourceReport::default()
        };

        for item in items {
            let record = match self.to_record(&item) {
                Ok(record) => record,
                Err(e) => {
                    warn!(source = %name, error = %e, "Skipping source item");
                    report.invalid += 1;
                    continue;
                }
            };
            match self.store.create(TaskState::NeedsAction, &record) {
                Ok(()) => {
                    info!(
                        task_id = %record.id,
                        source = %name,
                        priority = %record.priority,
                        "Source item queued"
                    );
                    report.created += 1;
                }
                Err(VaultError::AlreadyExists(_)) => {
                    debug!(task_id = %record.id, source = %name, "Source item already recorded");
                    report.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
            self.source.ack(&item).await?;
        }
        Ok(report)
    }

    fn to_record(&self, item: &SourceItem) -> Result<TaskRecord, WatchError> {
        let fragment: String = sanitize(item.id.trim()).chars().take(MAX_ID_FRAGMENT).collect();
        if fragment.trim_matches('_').is_empty() {
            return Err(WatchError::InvalidItem {
                id: item.id.clone(),
                reason: "missing external id".to_string(),
            });
        }
        let kind = match &item.kind {
            Some(kind) => kind
                .parse::<TaskKind>()
                .unwrap_or_else(|never| match never {}),
            None => self.default_kind.clone(),
        };
        let priority = match &item.priority {
            Some(value) => value
                .parse::<Priority>()
                .map_err(|reason| WatchError::InvalidItem {
                    id: item.id.clone(),
                    reason,
                })?,
            None if kind == TaskKind::Email => classify_email_priority(&item.subject, &item.labels),
            None => Priority::Medium,
        };

        let id = format!("{}_{}", kind.to_string().to_ascii_uppercase(), fragment);
        let mut record = TaskRecord::new(id, kind)
            .with_priority(priority)
            .with_zone_origin(&self.zone_id)
            .with_field("source", self.source.name())
            .with_field("external_id", &item.id);
        if let Some(at) = item.received_at {
            record.created_at = Some(at);
        }
        if !item.subject.is_empty() {
            record.set("subject", &item.subject);
        }
        if let Some(from) = &item.from {
            record.set("from", from);
        }
        if !item.labels.is_empty() {
            record.set("labels", item.labels.join(","));
        }
        for (key, value) in &item.fields {
            if !record.payload().contains_key(key) && !is_core_field(key) {
                record.set(key, value);
            }
        }
        let mut body = String::new();
        if !item.subject.is_empty() {
            body.push_str(&format!("# {}\n\n", item.subject));
        }
        body.push_str(item.body.trim_end());
        body.push('\n');
        record.set_body(body);
        Ok(record)
    }
}

fn is_core_field(key: &str) -> bool {
    steward_vault::record::RESERVED_KEYS.contains(&key)
}

// =============================================================================
// Spool directory source
// =============================================================================

/// Reads one JSON [`SourceItem`] per `*.json` file from a spool directory.
///
/// External fetchers (a mail poller, a webhook receiver) write items here.
/// Acknowledged files move to `processed/`; files that do not parse move to
/// `rejected/` so they are not retried on every poll.
pub struct SpoolSource {
    name: String,
    dir: PathBuf,
}

impl SpoolSource {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn item_path(&self, item: &SourceItem) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(&item.id)))
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> WatchError {
        WatchError::Unavailable {
            name: self.name.clone(),
            message: e.to_string(),
        }
    }

    fn set_aside(&self, path: &Path, folder: &str) -> Result<(), WatchError> {
        let target_dir = self.dir.join(folder);
        fs::create_dir_all(&target_dir)?;
        if let Some(name) = path.file_name() {
            fs::rename(path, target_dir.join(name))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PolledSource for SpoolSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<SourceItem>, WatchError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(e)),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
            .collect();
        paths.sort();

        let mut items = Vec::new();
        for path in paths {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<SourceItem>(&text).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(mut item) => {
                    if item.id.trim().is_empty() {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            item.id = stem.to_string();
                        }
                    }
                    // Ack looks the file up by id.
                    let expected = self.item_path(&item);
                    if expected != path {
                        fs::rename(&path, &expected).map_err(|e| self.unavailable(e))?;
                    }
                    items.push(item);
                }
                Err(reason) => {
                    warn!(source = %self.name, path = %path.display(), error = %reason, "Rejecting spool file");
                    self.set_aside(&path, "rejected")?;
                }
            }
        }
        Ok(items)
    }

    async fn ack(&self, item: &SourceItem) -> Result<(), WatchError> {
        let path = self.item_path(item);
        if path.exists() {
            self.set_aside(&path, "processed")?;
        }
        Ok(())
    }
}
