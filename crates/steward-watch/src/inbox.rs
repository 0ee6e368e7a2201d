//! Inbox drop watcher.
//!
//! Anything dropped into `Inbox/` becomes work in `Needs_Action`. A markdown
//! file that already carries a record header is claimed as-is; any other
//! file is wrapped in a `file_drop` record and moved to `Attachments/`.
//!
//! Drops are picked up as filesystem events arrive; a periodic full poll
//! covers startup and any event the platform watcher missed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use steward_core::types::{TaskKind, TaskState};
use steward_vault::{TaskRecord, VaultError, VaultStore};

use crate::error::WatchError;
use crate::priority::classify_file_priority;

/// Tallies of one inbox poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxReport {
    /// Headered records moved to Needs_Action.
    pub claimed: usize,
    /// Plain files wrapped in a file_drop record.
    pub wrapped: usize,
    /// Drops that were already handled or could not be moved.
    pub skipped: usize,
}

/// Writers get this long after the last event before a pass runs.
const EVENT_SETTLE: Duration = Duration::from_millis(200);
/// Suffixes tried when two different drops map to the same record id.
const MAX_ID_SUFFIX: u32 = 100;

/// Change notifications for `Inbox/`. Dropping this stops the watcher.
pub struct InboxEvents {
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

impl InboxEvents {
    /// Wait for the next burst of changes. `None` once the watcher is gone.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await?;
        tokio::time::sleep(EVENT_SETTLE).await;
        while self.rx.try_recv().is_ok() {}
        Some(())
    }
}

pub struct InboxWatcher {
    store: VaultStore,
    zone_id: String,
    // Event passes and the periodic sweep never overlap.
    pass: Mutex<()>,
}

impl InboxWatcher {
    pub fn new(store: VaultStore, zone_id: impl Into<String>) -> Self {
        Self {
            store,
            zone_id: zone_id.into(),
            pass: Mutex::new(()),
        }
    }

    /// Start a platform watcher on `Inbox/`.
    pub fn watch(&self) -> Result<InboxEvents, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_drop_event(&event.kind) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Inbox watcher error"),
        })?;
        let inbox = self.store.state_dir(TaskState::Inbox);
        fs::create_dir_all(&inbox)?;
        watcher.watch(&inbox, RecursiveMode::NonRecursive)?;
        info!(path = %inbox.display(), "Watching inbox");
        Ok(InboxEvents {
            _watcher: watcher,
            rx,
        })
    }

    /// Run a pass after every burst of inbox events until `stop` fires.
    pub async fn run_until(&self, mut events: InboxEvents, stop: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = stop.notified() => break,
                changed = events.changed() => {
                    if changed.is_none() {
                        warn!("Inbox event stream closed; relying on periodic polls");
                        break;
                    }
                    if let Err(e) = self.poll_once() {
                        warn!(error = %e, "Inbox pass failed");
                    }
                }
            }
        }
        debug!("Inbox event loop stopped");
    }

    /// Process every file currently in the inbox once.
    pub fn poll_once(&self) -> Result<InboxReport, WatchError> {
        let _pass = self.pass.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut report = InboxReport::default();
        let inbox = self.store.state_dir(TaskState::Inbox);
        let mut drops = Vec::new();
        for entry in fs::read_dir(&inbox)? {
            let path = entry?.path();
            if path.is_file() && !should_skip(&path) {
                drops.push(path);
            }
        }
        drops.sort();

        for path in drops {
            match self.handle(&path) {
                Ok(Handled::Claimed) => report.claimed += 1,
                Ok(Handled::Wrapped) => report.wrapped += 1,
                Ok(Handled::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Inbox drop not processed");
                    report.skipped += 1;
                }
            }
        }
        if report != InboxReport::default() {
            info!(
                claimed = report.claimed,
                wrapped = report.wrapped,
                skipped = report.skipped,
                "Inbox polled"
            );
        }
        Ok(report)
    }

    fn handle(&self, path: &Path) -> Result<Handled, WatchError> {
        if let Some(record) = parse_headered(path) {
            return self.claim_record(&record.id);
        }
        self.wrap_file(path)
    }

    fn claim_record(&self, id: &str) -> Result<Handled, WatchError> {
        let elsewhere: Vec<TaskState> = self
            .store
            .locate_all(id)
            .into_iter()
            .filter(|s| *s != TaskState::Inbox)
            .collect();
        if !elsewhere.is_empty() {
            let target = self.store.quarantine(id, TaskState::Inbox, "inbox")?;
            warn!(
                task_id = %id,
                states = ?elsewhere,
                path = %target.display(),
                "Dropped record duplicates an existing id"
            );
            return Ok(Handled::Skipped);
        }
        if self.store.claim(id, TaskState::Inbox, TaskState::NeedsAction)? {
            info!(task_id = %id, "Dropped record queued");
            Ok(Handled::Claimed)
        } else {
            Ok(Handled::Skipped)
        }
    }

    fn wrap_file(&self, path: &Path) -> Result<Handled, WatchError> {
        let name = file_name(path);
        let metadata = fs::metadata(path)?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let base = file_drop_id(path, modified);

        for suffix in 1..=MAX_ID_SUFFIX {
            let id = if suffix == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, suffix)
            };
            let attachment = self.attachment_path(&id, path);
            let record = TaskRecord::new(&id, TaskKind::FileDrop)
                .with_priority(classify_file_priority(path))
                .with_zone_origin(&self.zone_id)
                .with_field("original_name", &name)
                .with_field("file_extension", extension(path))
                .with_field("size_bytes", metadata.len().to_string())
                .with_field("attachment", attachment_ref(&attachment))
                .with_body(format!(
                    "# New File: {}\n\nA file was dropped in the Inbox for processing.\n",
                    name
                ));
            match self.store.create(TaskState::NeedsAction, &record) {
                Ok(()) => {}
                Err(VaultError::AlreadyExists(_)) if self.wraps(&id, &name) => {
                    // A crash after create and before the move left the
                    // record behind; finish the move.
                    debug!(task_id = %id, "File drop record exists");
                }
                Err(VaultError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }

            fs::create_dir_all(self.store.attachments_dir())?;
            fs::rename(path, &attachment)?;
            info!(task_id = %id, file = %name, "File drop queued");
            return Ok(Handled::Wrapped);
        }

        warn!(file = %name, base_id = %base, "No free record id for file drop");
        Ok(Handled::Skipped)
    }

    /// Whether the existing record `id` wraps the file called `name`.
    fn wraps(&self, id: &str, name: &str) -> bool {
        self.store
            .locate(id)
            .and_then(|state| self.store.read_in(state, id).ok())
            .is_some_and(|record| record.get("original_name") == Some(name))
    }

    fn attachment_path(&self, id: &str, path: &Path) -> PathBuf {
        let ext = extension(path);
        let file = if ext.is_empty() {
            id.to_string()
        } else {
            format!("{}.{}", id, ext)
        };
        self.store.attachments_dir().join(file)
    }
}

enum Handled {
    Claimed,
    Wrapped,
    Skipped,
}

fn is_drop_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Hidden files and in-flight temp files are left alone.
fn should_skip(path: &Path) -> bool {
    let name = file_name(path);
    name.starts_with('.') || name.contains(".tmp")
}

fn parse_headered(path: &Path) -> Option<TaskRecord> {
    if extension(path) != "md" {
        return None;
    }
    let id = path.file_stem()?.to_str()?;
    let text = fs::read_to_string(path).ok()?;
    TaskRecord::parse(id, &text).ok()
}

/// Deterministic id for a dropped file: `FILE_<stem>_<ext>_<mtime>`. The
/// same drop always maps to the same record.
pub fn file_drop_id(path: &Path, modified: DateTime<Utc>) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let stamp = modified.format("%Y%m%d%H%M%S");
    match extension(path).as_str() {
        "" => format!("FILE_{}_{}", sanitize(stem), stamp),
        ext => format!("FILE_{}_{}_{}", sanitize(stem), sanitize(ext), stamp),
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn attachment_ref(path: &Path) -> String {
    format!(
        "{}/{}",
        steward_vault::store::ATTACHMENTS_DIR,
        file_name(path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use steward_core::types::Priority;

    fn setup() -> (tempfile::TempDir, VaultStore, InboxWatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::open(dir.path()).unwrap();
        let watcher = InboxWatcher::new(store.clone(), "local");
        (dir, store, watcher)
    }

    fn inbox(store: &VaultStore) -> PathBuf {
        store.state_dir(TaskState::Inbox)
    }

    #[test]
    fn test_plain_file_is_wrapped() {
        let (_dir, store, watcher) = setup();
        fs::write(inbox(&store).join("Q3 report.pdf"), b"%PDF").unwrap();

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.wrapped, 1);

        let ids = store.list(TaskState::NeedsAction).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids[0].starts_with("FILE_Q3_report_"));
        let record = store.read_in(TaskState::NeedsAction, &ids[0]).unwrap();
        assert_eq!(record.kind, TaskKind::FileDrop);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.get("original_name"), Some("Q3 report.pdf"));
        assert_eq!(record.get("size_bytes"), Some("4"));

        let attachment = store.attachments_dir().join(format!("{}.pdf", ids[0]));
        assert!(attachment.is_file());
        assert!(fs::read_dir(inbox(&store)).unwrap().next().is_none());
    }

    #[test]
    fn test_headered_record_is_claimed() {
        let (_dir, store, watcher) = setup();
        let record = TaskRecord::new("EMAIL_42", TaskKind::Email).with_body("Hi");
        store.create(TaskState::Inbox, &record).unwrap();

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(store.locate("EMAIL_42"), Some(TaskState::NeedsAction));
    }

    #[test]
    fn test_headerless_markdown_is_wrapped() {
        let (_dir, store, watcher) = setup();
        fs::write(inbox(&store).join("notes.md"), "just some notes").unwrap();

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.wrapped, 1);
        assert_eq!(report.claimed, 0);
        let ids = store.list(TaskState::NeedsAction).unwrap();
        let record = store.read_in(TaskState::NeedsAction, &ids[0]).unwrap();
        assert_eq!(record.priority, Priority::Medium);
    }

    #[test]
    fn test_hidden_and_temp_files_ignored() {
        let (_dir, store, watcher) = setup();
        fs::write(inbox(&store).join(".DS_Store"), b"x").unwrap();
        fs::write(inbox(&store).join("upload.tmp"), b"x").unwrap();

        let report = watcher.poll_once().unwrap();
        assert_eq!(report, InboxReport::default());
        assert_eq!(store.count(TaskState::NeedsAction).unwrap(), 0);
    }

    #[test]
    fn test_interrupted_wrap_is_finished_without_duplicate() {
        let (_dir, store, watcher) = setup();
        let path = inbox(&store).join("scan.png");
        fs::write(&path, b"png").unwrap();
        watcher.poll_once().unwrap();

        // Simulate a crash between record creation and the move.
        let id = store.list(TaskState::NeedsAction).unwrap().remove(0);
        let attachment = store.attachments_dir().join(format!("{}.png", id));
        fs::rename(&attachment, &path).unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(file_drop_id(&path, DateTime::<Utc>::from(modified)), id);

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.wrapped, 1);
        assert_eq!(store.count(TaskState::NeedsAction).unwrap(), 1);
        assert!(attachment.is_file());
    }

    #[test]
    fn test_duplicate_id_is_quarantined() {
        let (_dir, store, watcher) = setup();
        let record = TaskRecord::new("EMAIL_7", TaskKind::Email);
        store.create(TaskState::Done, &record).unwrap();
        fs::write(
            inbox(&store).join("EMAIL_7.md"),
            record.render(TaskState::Inbox),
        )
        .unwrap();

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(store.locate_all("EMAIL_7"), vec![TaskState::Done]);
        assert_eq!(store.list_conflicts().unwrap(), vec!["EMAIL_7@inbox"]);
    }

    #[test]
    fn test_file_drop_id() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            file_drop_id(Path::new("/x/My File (1).txt"), at),
            "FILE_My_File__1__txt_20260102030405"
        );
        assert_eq!(file_drop_id(Path::new("/x/README"), at), "FILE_README_20260102030405");
    }

    fn drop_at(store: &VaultStore, name: &str, at: std::time::SystemTime) {
        let path = inbox(store).join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    #[test]
    fn test_same_stem_drops_get_separate_records() {
        let (_dir, store, watcher) = setup();
        let at = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        drop_at(&store, "invoice.pdf", at);
        drop_at(&store, "invoice.xlsx", at);

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.wrapped, 2);
        let ids = store.list(TaskState::NeedsAction).unwrap();
        assert_eq!(ids.len(), 2);
        let mut names: Vec<String> = ids
            .iter()
            .map(|id| {
                let record = store.read_in(TaskState::NeedsAction, id).unwrap();
                record.get("original_name").unwrap().to_string()
            })
            .collect();
        names.sort();
        assert_eq!(names, vec!["invoice.pdf", "invoice.xlsx"]);
        assert_eq!(fs::read_dir(store.attachments_dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_colliding_id_is_disambiguated() {
        let (_dir, store, watcher) = setup();
        let at = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        drop_at(&store, "scan.PDF", at);
        drop_at(&store, "scan.pdf", at);

        let report = watcher.poll_once().unwrap();
        assert_eq!(report.wrapped, 2);
        let ids = store.list(TaskState::NeedsAction).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().any(|id| id.ends_with("_2")));
        assert!(fs::read_dir(inbox(&store)).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_drop_after_watch_starts_is_picked_up() {
        let (_dir, store, watcher) = setup();
        let events = watcher.watch().unwrap();
        let stop = Arc::new(Notify::new());

        let check = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            fs::write(inbox(&store).join("contract.docx"), b"doc").unwrap();
            for _ in 0..50 {
                if store.count(TaskState::NeedsAction).unwrap() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            stop.notify_one();
        };
        tokio::join!(watcher.run_until(events, Arc::clone(&stop)), check);

        let ids = store.list(TaskState::NeedsAction).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids[0].starts_with("FILE_contract_docx_"));
    }
}
