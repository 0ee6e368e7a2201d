//! Folder-per-state record store.
//!
//! Each lifecycle state is a directory under the vault root and each record
//! is one `<id>.md` file. `claim` (an atomic rename) is the only way a record
//! changes state; a claim whose source has vanished returns `false` because
//! another actor got there first.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use steward_core::lifecycle::validate_transition;
use steward_core::types::{Priority, TaskState};

use crate::codec::Document;
use crate::error::VaultError;
use crate::record::TaskRecord;

pub const LOGS_DIR: &str = "Logs";
pub const BRIEFINGS_DIR: &str = "Briefings";
pub const ATTACHMENTS_DIR: &str = "Attachments";
pub const CONFLICTS_DIR: &str = "Conflicts";
/// Zone-local state that is never replicated.
pub const INTERNAL_DIR: &str = ".steward";

const RECORD_EXT: &str = "md";

/// Hierarchical record store rooted at one directory.
#[derive(Debug, Clone)]
pub struct VaultStore {
    root: PathBuf,
}

/// Sort key of a listed record.
struct ListEntry {
    id: String,
    priority: Priority,
    created: DateTime<Utc>,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a vault and create any missing folders.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let store = Self::new(root);
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self, state: TaskState) -> PathBuf {
        self.root.join(state.folder())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn briefings_dir(&self) -> PathBuf {
        self.root.join(BRIEFINGS_DIR)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    pub fn conflicts_dir(&self) -> PathBuf {
        self.root.join(CONFLICTS_DIR)
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.root.join(INTERNAL_DIR)
    }

    fn record_path(&self, state: TaskState, id: &str) -> PathBuf {
        self.state_dir(state).join(format!("{}.{}", id, RECORD_EXT))
    }

    /// Create every state folder plus the auxiliary folders.
    pub fn ensure_layout(&self) -> Result<(), VaultError> {
        for state in TaskState::ALL {
            fs::create_dir_all(self.state_dir(state))?;
        }
        for dir in [
            self.logs_dir(),
            self.briefings_dir(),
            self.attachments_dir(),
            self.conflicts_dir(),
            self.internal_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// True when every state folder exists.
    pub fn health_check(&self) -> bool {
        TaskState::ALL
            .iter()
            .all(|state| self.state_dir(*state).is_dir())
    }

    /// Record ids in `state`: priority descending, then creation time
    /// ascending, then id. Records whose header does not parse sort as low
    /// priority by file modification time.
    pub fn list(&self, state: TaskState) -> Result<Vec<String>, VaultError> {
        let mut entries = Vec::new();
        for (id, path) in self.record_files(&self.state_dir(state))? {
            let fallback_created = file_mtime(&path);
            let entry = match fs::read_to_string(&path)
                .ok()
                .and_then(|text| TaskRecord::parse(id.clone(), &text).ok())
            {
                Some(record) => ListEntry {
                    priority: record.priority,
                    created: record.created_at.unwrap_or(fallback_created),
                    id,
                },
                None => ListEntry {
                    id,
                    priority: Priority::Low,
                    created: fallback_created,
                },
            };
            entries.push(entry);
        }
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries.into_iter().map(|e| e.id).collect())
    }

    /// Number of records in `state`.
    pub fn count(&self, state: TaskState) -> Result<usize, VaultError> {
        Ok(self.record_files(&self.state_dir(state))?.len())
    }

    /// Current state of a record. If sync left copies in several states the
    /// most advanced one is reported.
    pub fn locate(&self, id: &str) -> Option<TaskState> {
        TaskState::ALL
            .into_iter()
            .rev()
            .find(|state| self.record_path(*state, id).is_file())
    }

    /// Every state holding a copy of `id`.
    pub fn locate_all(&self, id: &str) -> Vec<TaskState> {
        TaskState::ALL
            .into_iter()
            .filter(|state| self.record_path(*state, id).is_file())
            .collect()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.locate(id).is_some()
    }

    /// Read a record from its current location.
    pub fn read(&self, id: &str) -> Result<TaskRecord, VaultError> {
        let state = self
            .locate(id)
            .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
        self.read_in(state, id)
    }

    /// Read a record from a specific state folder.
    pub fn read_in(&self, state: TaskState, id: &str) -> Result<TaskRecord, VaultError> {
        let doc = self.read_document_in(state, id)?;
        let mut record =
            TaskRecord::from_document(id, doc).map_err(|source| VaultError::Codec {
                id: id.to_string(),
                source,
            })?;
        record.state = Some(state);
        Ok(record)
    }

    /// Raw text of a record file.
    pub fn read_text_in(&self, state: TaskState, id: &str) -> Result<String, VaultError> {
        match fs::read_to_string(self.record_path(state, id)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VaultError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Modification time of a record file. A claim stamps it, so for
    /// `In_Progress` this is when the record was last claimed.
    pub fn modified_at(&self, state: TaskState, id: &str) -> Option<DateTime<Utc>> {
        let path = self.record_path(state, id);
        path.is_file().then(|| file_mtime(&path))
    }

    /// Raw document of a record, for records whose typed view does not parse.
    pub fn read_document_in(&self, state: TaskState, id: &str) -> Result<Document, VaultError> {
        let text = self.read_text_in(state, id)?;
        Document::parse(&text).map_err(|source| VaultError::Codec {
            id: id.to_string(),
            source,
        })
    }

    /// Overwrite a record in its current location.
    pub fn write(&self, record: &TaskRecord) -> Result<TaskState, VaultError> {
        let state = self
            .locate(&record.id)
            .ok_or_else(|| VaultError::NotFound(record.id.clone()))?;
        self.replace(state, &record.id, &record.render(state))?;
        Ok(state)
    }

    /// Overwrite a raw document in `state`.
    pub fn write_document_in(
        &self,
        state: TaskState,
        id: &str,
        doc: &Document,
    ) -> Result<(), VaultError> {
        let mut doc = doc.clone();
        doc.set(crate::record::KEY_STATUS, state.folder());
        self.replace(state, id, &doc.render())
    }

    /// Create a new record in `state`. Fails with `AlreadyExists` if the id is
    /// present in any state.
    pub fn create(&self, state: TaskState, record: &TaskRecord) -> Result<(), VaultError> {
        if self.exists(&record.id) {
            return Err(VaultError::AlreadyExists(record.id.clone()));
        }
        let dir = self.state_dir(state);
        fs::create_dir_all(&dir)?;
        let target = self.record_path(state, &record.id);
        let tmp = temp_path(&dir, &record.id);
        fs::write(&tmp, record.render(state))?;
        // hard_link refuses to replace an existing target.
        let linked = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {
                debug!(task_id = %record.id, state = %state, "Record created");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(VaultError::AlreadyExists(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically move a record between states.
    ///
    /// Returns `Ok(false)` when the source is gone: another actor already
    /// claimed it. Fails if the transition is not allowed or the destination
    /// already holds a record with the same id.
    pub fn claim(&self, id: &str, from: TaskState, to: TaskState) -> Result<bool, VaultError> {
        validate_transition(from, to).map_err(|_| VaultError::InvalidTransition { from, to })?;

        let source = self.record_path(from, id);
        let target = self.record_path(to, id);
        if target.exists() {
            if !source.exists() {
                debug!(task_id = %id, from = %from, to = %to, "Claim lost: record already moved");
                return Ok(false);
            }
            return Err(VaultError::Occupied {
                id: id.to_string(),
                state: to,
            });
        }
        fs::create_dir_all(self.state_dir(to))?;
        match fs::rename(&source, &target) {
            Ok(()) => {
                touch(&target);
                debug!(task_id = %id, from = %from, to = %to, "Record claimed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(task_id = %id, from = %from, to = %to, "Claim lost: record already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a copy of a record out of `state` into `Conflicts/<id>@<tag>.md`.
    pub fn quarantine(&self, id: &str, state: TaskState, tag: &str) -> Result<PathBuf, VaultError> {
        let source = self.record_path(state, id);
        let dir = self.conflicts_dir();
        fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}@{}.{}", id, tag, RECORD_EXT));
        match fs::rename(&source, &target) {
            Ok(()) => {
                warn!(task_id = %id, state = %state, path = %target.display(), "Record quarantined");
                Ok(target)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(VaultError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// File names in `Conflicts/` awaiting human resolution.
    pub fn list_conflicts(&self) -> Result<Vec<String>, VaultError> {
        let mut names: Vec<String> = self
            .record_files(&self.conflicts_dir())?
            .into_iter()
            .map(|(stem, _)| stem)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Write `text` to an existing record file through a temp file and
    /// rename. A record that vanished in the meantime is not resurrected.
    fn replace(&self, state: TaskState, id: &str, text: &str) -> Result<(), VaultError> {
        let dir = self.state_dir(state);
        let target = self.record_path(state, id);
        let tmp = temp_path(&dir, id);
        fs::write(&tmp, text)?;
        if !target.exists() {
            let _ = fs::remove_file(&tmp);
            return Err(VaultError::NotFound(id.to_string()));
        }
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// `(stem, path)` of every visible `.md` file in `dir`.
    fn record_files(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>, VaultError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        Ok(files)
    }
}

fn temp_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()))
}

/// Best-effort mtime bump; rename keeps the old one.
fn touch(path: &Path) {
    if let Ok(file) = fs::OpenOptions::new().write(true).open(path) {
        let _ = file.set_modified(SystemTime::now());
    }
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}
