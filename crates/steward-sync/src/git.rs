//! Thin async wrapper over the `git` binary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::SyncError;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs git inside one working tree with a per-call timeout.
#[derive(Debug, Clone)]
pub struct Git {
    dir: PathBuf,
    timeout: Duration,
    identity: Option<(String, String)>,
}

impl Git {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            identity: None,
        }
    }

    /// Author and committer used for every commit made through this handle.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run git and capture its output. A non-zero exit is not an error here.
    pub async fn run(&self, args: &[&str]) -> Result<GitOutput, SyncError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some((name, email)) = &self.identity {
            cmd.env("GIT_AUTHOR_NAME", name)
                .env("GIT_AUTHOR_EMAIL", email)
                .env("GIT_COMMITTER_NAME", name)
                .env("GIT_COMMITTER_EMAIL", email);
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::GitNotFound,
            _ => SyncError::Io(e),
        })?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let out = GitOutput {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        debug!(command = %args.join(" "), ok = out.ok, "git");
        Ok(out)
    }

    /// Run git and fail on a non-zero exit.
    pub async fn check(&self, args: &[&str]) -> Result<String, SyncError> {
        let out = self.run(args).await?;
        if out.ok {
            Ok(out.stdout)
        } else {
            Err(SyncError::Git {
                command: args.join(" "),
                stderr: truncate(&out.stderr),
            })
        }
    }

    pub async fn is_repository(&self) -> bool {
        matches!(
            self.run(&["rev-parse", "--is-inside-work-tree"]).await,
            Ok(out) if out.ok && out.stdout == "true"
        )
    }

    pub async fn has_remote(&self, remote: &str) -> Result<bool, SyncError> {
        Ok(self.run(&["remote", "get-url", remote]).await?.ok)
    }

    /// Commit id of `rev`, or `None` if it does not resolve.
    pub async fn rev_parse(&self, rev: &str) -> Result<Option<String>, SyncError> {
        let object = format!("{}^{{commit}}", rev);
        let out = self.run(&["rev-parse", "-q", "--verify", &object]).await?;
        Ok(out.ok.then_some(out.stdout))
    }

    pub async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, SyncError> {
        let out = self.run(&["merge-base", a, b]).await?;
        Ok(out.ok.then_some(out.stdout))
    }

    /// Committer time of `rev` as a unix timestamp.
    pub async fn commit_time(&self, rev: &str) -> Result<i64, SyncError> {
        let out = self.check(&["log", "-1", "--format=%ct", rev]).await?;
        out.trim().parse().map_err(|_| SyncError::Git {
            command: format!("log -1 {}", rev),
            stderr: format!("unexpected commit time: {}", out),
        })
    }

    /// Every file path tracked at `rev`.
    pub async fn ls_tree(&self, rev: &str) -> Result<Vec<String>, SyncError> {
        let out = self.check(&["ls-tree", "-r", "-z", "--name-only", rev]).await?;
        Ok(split_nul(&out))
    }

    /// Paths that differ between two commits.
    pub async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>, SyncError> {
        let out = self
            .check(&["diff", "--name-only", "--no-renames", "-z", from, to])
            .await?;
        Ok(split_nul(&out))
    }

    /// Paths left unmerged by an interrupted merge.
    pub async fn unmerged_paths(&self) -> Result<Vec<String>, SyncError> {
        let out = self
            .check(&["diff", "--name-only", "-z", "--diff-filter=U"])
            .await?;
        Ok(split_nul(&out))
    }

    /// True when the index differs from HEAD.
    pub async fn has_staged_changes(&self) -> Result<bool, SyncError> {
        // Exit status 1 means "differences found".
        Ok(!self.run(&["diff", "--cached", "--quiet"]).await?.ok)
    }

    /// Contents of `path` at `rev`, or `None` if the path does not exist there.
    pub async fn show(&self, rev: &str, path: &str) -> Result<Option<String>, SyncError> {
        let object = format!("{}:{}", rev, path);
        let out = self.run(&["show", &object]).await?;
        Ok(out.ok.then_some(out.stdout))
    }

    pub async fn path_exists(&self, rev: &str, path: &str) -> Result<bool, SyncError> {
        let object = format!("{}:{}", rev, path);
        Ok(self.run(&["cat-file", "-e", &object]).await?.ok)
    }
}

fn split_nul(text: &str) -> Vec<String> {
    text.split('\0')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() > MAX {
        text.chars().take(MAX).collect()
    } else {
        text.to_string()
    }
}

/// Whether a usable git binary is on PATH.
pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
