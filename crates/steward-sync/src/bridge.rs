//! Periodic vault replication between zones.
//!
//! One sync round: commit local changes, fetch the shared branch, merge
//! with file-level last-writer-wins, re-file divergent moves into
//! `Conflicts/`, commit and push. Records two zones moved to different
//! states are never auto-resolved; both copies are kept for a human.

use std::fs;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use steward_core::config::SyncConfig;
use steward_core::types::TaskState;
use steward_vault::store::INTERNAL_DIR;
use steward_vault::{VaultError, VaultStore};

use crate::error::SyncError;
use crate::git::Git;
use crate::index::{detect_divergent, record_path, DivergentMove, LocationIndex};

const FETCHED: &str = "FETCH_HEAD";

/// A record left in `Conflicts/` for human resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub id: String,
    /// States whose copies were re-filed.
    pub states: Vec<TaskState>,
    /// State before the divergence, when known.
    pub base: Option<TaskState>,
}

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub committed: bool,
    pub pulled: bool,
    pub pushed: bool,
    pub conflicts: Vec<SyncConflict>,
}

/// Which side of a merge wins a file changed on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Winner {
    Ours,
    Theirs,
}

impl Winner {
    fn strategy(&self) -> &'static str {
        match self {
            Winner::Ours => "ours",
            Winner::Theirs => "theirs",
        }
    }
}

pub struct SyncBridge {
    store: VaultStore,
    git: Git,
    zone_id: String,
    remote: String,
    branch: String,
}

impl SyncBridge {
    pub fn new(
        store: VaultStore,
        zone_id: impl Into<String>,
        remote: impl Into<String>,
        branch: impl Into<String>,
        git_timeout: Duration,
    ) -> Self {
        let zone_id = zone_id.into();
        let git = Git::new(store.root(), git_timeout)
            .with_identity(format!("steward ({})", zone_id), format!("steward@{}", zone_id));
        Self {
            store,
            git,
            zone_id,
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn from_config(store: VaultStore, config: &SyncConfig, zone_id: &str) -> Self {
        Self::new(
            store,
            zone_id,
            &config.remote,
            &config.branch,
            Duration::from_secs(config.git_timeout_secs.max(1)),
        )
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Run one full sync round.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        if !self.git.is_repository().await {
            return Err(SyncError::NotARepository(self.store.root().to_path_buf()));
        }
        let mut report = SyncReport::default();
        self.ensure_gitignore()?;
        report.committed = self.commit_local("auto-sync").await?;

        if !self.git.has_remote(&self.remote).await? {
            info!(remote = %self.remote, "No sync remote configured, skipping pull and push");
            report.conflicts = self.refile_duplicates(&[]).await?;
            if !report.conflicts.is_empty() {
                self.commit_local("conflicts").await?;
            }
            return Ok(report);
        }

        let fetch = self.git.run(&["fetch", &self.remote, &self.branch]).await?;
        if !fetch.ok {
            if fetch.stderr.contains("couldn't find remote ref") {
                info!(branch = %self.branch, "Remote branch missing, publishing local history");
                report.pushed = self.push().await?;
                return Ok(report);
            }
            return Err(SyncError::Git {
                command: format!("fetch {} {}", self.remote, self.branch),
                stderr: fetch.stderr,
            });
        }

        let divergent = self.pull(&mut report).await?;
        report.conflicts = self.refile_duplicates(&divergent).await?;
        if !report.conflicts.is_empty() {
            self.commit_local("conflicts").await?;
        }
        report.pushed = self.push().await?;

        info!(
            zone = %self.zone_id,
            committed = report.committed,
            pulled = report.pulled,
            pushed = report.pushed,
            conflicts = report.conflicts.len(),
            "Vault sync finished"
        );
        Ok(report)
    }

    /// Bring the fetched remote head into the working tree. Returns the
    /// divergent moves found, if the histories had diverged.
    async fn pull(&self, report: &mut SyncReport) -> Result<Vec<DivergentMove>, SyncError> {
        let Some(remote_head) = self.git.rev_parse(FETCHED).await? else {
            return Ok(Vec::new());
        };
        let Some(local_head) = self.git.rev_parse("HEAD").await? else {
            // Empty local history: adopt the remote branch as-is.
            self.git
                .check(&["reset", "-q", "--hard", &remote_head])
                .await?;
            report.pulled = true;
            return Ok(Vec::new());
        };
        if local_head == remote_head {
            return Ok(Vec::new());
        }

        let base = self.git.merge_base(&local_head, &remote_head).await?;
        if base.as_deref() == Some(remote_head.as_str()) {
            debug!("Local history ahead of remote");
            return Ok(Vec::new());
        }
        if base.as_deref() == Some(local_head.as_str()) {
            self.git.check(&["merge", "-q", "--ff-only", &remote_head]).await?;
            report.pulled = true;
            return Ok(Vec::new());
        }

        let base_index = match &base {
            Some(base) => LocationIndex::from_paths(self.git.ls_tree(base).await?),
            None => LocationIndex::default(),
        };
        let local_index = LocationIndex::from_paths(self.git.ls_tree(&local_head).await?);
        let remote_index = LocationIndex::from_paths(self.git.ls_tree(&remote_head).await?);
        let divergent = detect_divergent(&base_index, &local_index, &remote_index);

        let local_time = self.git.commit_time(&local_head).await?;
        let remote_time = self.git.commit_time(&remote_head).await?;
        let winner = if local_time > remote_time {
            Winner::Ours
        } else {
            Winner::Theirs
        };
        self.merge(base.as_deref(), &local_head, &remote_head, winner)
            .await?;
        report.pulled = true;

        for moved in &divergent {
            self.restore_copy(&moved.id, moved.local, &local_head).await?;
            self.restore_copy(&moved.id, moved.remote, &remote_head).await?;
        }
        Ok(divergent)
    }

    /// Merge with file-level last-writer-wins: every path changed on both
    /// sides takes the winner's version whole.
    async fn merge(
        &self,
        base: Option<&str>,
        local_head: &str,
        remote_head: &str,
        winner: Winner,
    ) -> Result<(), SyncError> {
        let strategy = format!("-X{}", winner.strategy());
        let mut args = vec![
            "merge",
            "-q",
            "--no-commit",
            "--no-ff",
            "-Xno-renames",
            strategy.as_str(),
        ];
        if base.is_none() {
            args.push("--allow-unrelated-histories");
        }
        args.push(remote_head);
        let merged = self.git.run(&args).await?;
        if !merged.ok && self.git.rev_parse("MERGE_HEAD").await?.is_none() {
            return Err(SyncError::Git {
                command: "merge".to_string(),
                stderr: merged.stderr,
            });
        }

        let mut contested = self.git.unmerged_paths().await?;
        if let Some(base) = base {
            let ours = self.git.changed_paths(base, local_head).await?;
            let theirs = self.git.changed_paths(base, remote_head).await?;
            contested.extend(ours.into_iter().filter(|p| theirs.contains(p)));
        }
        contested.sort();
        contested.dedup();

        let winner_rev = match winner {
            Winner::Ours => local_head,
            Winner::Theirs => remote_head,
        };
        for path in &contested {
            if self.git.path_exists(winner_rev, path).await? {
                self.git.check(&["checkout", winner_rev, "--", path]).await?;
            } else {
                self.git
                    .check(&["rm", "-q", "-f", "--ignore-unmatch", "--", path])
                    .await?;
            }
        }
        if !contested.is_empty() {
            debug!(paths = contested.len(), winner = winner.strategy(), "Resolved contested paths");
        }

        let message = self.message("merge");
        self.git.check(&["commit", "-q", "--no-verify", "-m", &message]).await?;
        Ok(())
    }

    /// Make sure `state/<id>.md` holds the copy from `rev`, so both sides of
    /// a divergent move survive the merge.
    async fn restore_copy(&self, id: &str, state: TaskState, rev: &str) -> Result<(), SyncError> {
        let path = self.store.state_dir(state).join(format!("{}.md", id));
        if path.is_file() {
            return Ok(());
        }
        if let Some(text) = self.git.show(rev, &record_path(state, id)).await? {
            fs::create_dir_all(self.store.state_dir(state))?;
            fs::write(&path, format!("{}\n", text))?;
        }
        Ok(())
    }

    /// Re-file every divergent move and any id held in several states.
    async fn refile_duplicates(
        &self,
        divergent: &[DivergentMove],
    ) -> Result<Vec<SyncConflict>, SyncError> {
        let index = LocationIndex::scan(&self.store)?;
        let mut conflicts = Vec::new();

        for moved in divergent {
            let states: Vec<TaskState> = index
                .states(&moved.id)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            conflicts.push(self.quarantine(&moved.id, &states, moved.base)?);
        }
        for (id, states) in index.duplicates() {
            if divergent.iter().any(|m| m.id == id) {
                continue;
            }
            conflicts.push(self.quarantine(&id, &states, None)?);
        }
        Ok(conflicts)
    }

    fn quarantine(
        &self,
        id: &str,
        states: &[TaskState],
        base: Option<TaskState>,
    ) -> Result<SyncConflict, SyncError> {
        let mut filed = Vec::new();
        for state in states {
            match self.store.quarantine(id, *state, state.folder()) {
                Ok(_) => filed.push(*state),
                Err(VaultError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        warn!(
            task_id = %id,
            states = ?filed,
            base = ?base,
            zone = %self.zone_id,
            "Divergent record moved to Conflicts"
        );
        Ok(SyncConflict {
            id: id.to_string(),
            states: filed,
            base,
        })
    }

    /// Stage everything and commit. Returns whether a commit was made.
    async fn commit_local(&self, what: &str) -> Result<bool, SyncError> {
        self.git.check(&["add", "-A"]).await?;
        if !self.git.has_staged_changes().await? {
            debug!("No vault changes to commit");
            return Ok(false);
        }
        let message = self.message(what);
        self.git.check(&["commit", "-q", "--no-verify", "-m", &message]).await?;
        info!(message = %message, "Vault committed");
        Ok(true)
    }

    async fn push(&self) -> Result<bool, SyncError> {
        if self.git.rev_parse("HEAD").await?.is_none() {
            return Ok(false);
        }
        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        let out = self.git.run(&["push", "-q", &self.remote, &refspec]).await?;
        if !out.ok {
            // Usually the remote moved on; the next round merges it.
            warn!(remote = %self.remote, error = %out.stderr, "Vault push failed");
        }
        Ok(out.ok)
    }

    fn message(&self, what: &str) -> String {
        format!(
            "[{}] {} {}",
            self.zone_id,
            what,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Keep zone-local state out of the replicated tree.
    fn ensure_gitignore(&self) -> Result<(), SyncError> {
        let path = self.store.root().join(".gitignore");
        let line = format!("{}/", INTERNAL_DIR);
        let existing = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|l| l.trim() == line) {
            return Ok(());
        }
        let mut text = existing;
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&line);
        text.push('\n');
        fs::write(&path, text)?;
        Ok(())
    }
}
