//! CLI argument definitions for the steward binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// How long the process lives and which jobs it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Watcher jobs only.
    Watch,
    /// One triage cycle plus the approval and rejected sweeps, then exit.
    Once,
    /// Every job on its interval, plus the health server.
    Scheduled,
    /// A single vault sync round, then exit.
    Sync,
}

/// Steward - a vault-backed task orchestrator with human approval.
#[derive(Parser, Debug)]
#[command(name = "steward", version, about)]
pub struct CliArgs {
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = Mode::Scheduled)]
    pub mode: Mode,

    /// Zone identity of this instance (e.g. cloud, local).
    #[arg(short = 'z', long = "zone")]
    pub zone: Option<String>,

    /// Root of the vault folder tree.
    #[arg(short = 'v', long = "vault")]
    pub vault: Option<PathBuf>,

    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log intended side effects instead of performing them.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Health server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
}

impl CliArgs {
    /// Priority: --config flag > STEWARD_CONFIG env var > ./steward.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        first_of(self.config.clone(), env("STEWARD_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("steward.toml"))
    }

    /// Priority: --vault flag > STEWARD_VAULT env var > config file value.
    pub fn resolve_vault(&self, config_vault: &Path) -> PathBuf {
        first_of(self.vault.clone(), env("STEWARD_VAULT").map(PathBuf::from))
            .unwrap_or_else(|| config_vault.to_path_buf())
    }

    /// Priority: --zone flag > STEWARD_ZONE > ZONE > config file value.
    pub fn resolve_zone(&self, config_zone: &str) -> String {
        first_of(
            self.zone.clone(),
            first_of(env("STEWARD_ZONE"), env("ZONE")),
        )
        .unwrap_or_else(|| config_zone.to_string())
    }

    /// Priority: --dry-run flag > DRY_RUN env var > config file value.
    pub fn resolve_dry_run(&self, config_dry_run: bool) -> bool {
        if self.dry_run {
            return true;
        }
        match env("DRY_RUN") {
            Some(value) => parse_flag(&value).unwrap_or(config_dry_run),
            None => config_dry_run,
        }
    }

    /// Priority: --port flag > HEALTH_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        first_of(self.port, env("HEALTH_PORT").and_then(|p| p.parse().ok())).unwrap_or(config_port)
    }

    /// Priority: RUST_LOG > --log-level flag > config file value.
    ///
    /// RUST_LOG wins because it may carry per-target directives.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        first_of(env("RUST_LOG"), self.log_level.clone())
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn first_of<T>(flag: Option<T>, env: Option<T>) -> Option<T> {
    flag.or(env)
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
