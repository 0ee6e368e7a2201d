use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StewardError};
use crate::types::Capability;

/// Top-level configuration for one steward zone instance.
///
/// Loaded from `~/.steward/config.toml` by default. Each section corresponds
/// to one component of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// External command per action name (`email_send`, `linkedin_post`, ...).
    #[serde(default)]
    pub executors: HashMap<String, ExecutorConfig>,
    #[serde(default)]
    pub drafts: DraftConfig,
    #[serde(default)]
    pub watchers: WatcherConfig,
}

impl StewardConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StewardConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field invariants that serde cannot express.
    ///
    /// The executing zone is named once per deployment; a zone may hold
    /// `approve_execute` if and only if it is that zone.
    pub fn validate(&self) -> Result<()> {
        if self.zone.id.trim().is_empty() {
            return Err(StewardError::Config("zone.id must not be empty".into()));
        }
        let holds_execute = self.zone.capabilities.contains(&Capability::ApproveExecute);
        let is_execution_zone = self.zone.id == self.zone.execution_zone;
        if holds_execute && !is_execution_zone {
            return Err(StewardError::Config(format!(
                "zone '{}' holds approve_execute but the execution zone is '{}'",
                self.zone.id, self.zone.execution_zone
            )));
        }
        if is_execution_zone && !holds_execute {
            return Err(StewardError::Config(format!(
                "zone '{}' is the execution zone but lacks approve_execute",
                self.zone.id
            )));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_fraction) {
            return Err(StewardError::Config(
                "retry.jitter_fraction must be in [0, 1)".into(),
            ));
        }
        if self.retry.failure_threshold == 0 {
            return Err(StewardError::Config(
                "retry.failure_threshold must be at least 1".into(),
            ));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(StewardError::Config(
                "orchestrator.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply the zone identity and derive its default capability set.
    ///
    /// Used when the zone is picked by flag or environment and the config
    /// file does not list capabilities for it.
    pub fn with_zone(mut self, zone_id: &str) -> Self {
        if self.zone.id != zone_id {
            self.zone.capabilities = ZoneConfig::default_capabilities(zone_id, &self.zone.execution_zone);
            self.zone.id = zone_id.to_string();
        }
        self
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root of the vault folder tree.
    pub vault_path: PathBuf,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// When true every executor logs the intended effect and reports success.
    pub dry_run: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            vault_path: PathBuf::from("Vault"),
            log_level: "info".to_string(),
            dry_run: false,
        }
    }
}

/// Zone identity and capability subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Identity of this instance, e.g. "cloud" or "local".
    pub id: String,
    /// Capabilities this instance may exercise.
    pub capabilities: Vec<Capability>,
    /// The single zone of the deployment that executes approved actions.
    pub execution_zone: String,
}

impl ZoneConfig {
    /// Default capabilities for a zone id: every zone triages and drafts,
    /// only the execution zone executes.
    pub fn default_capabilities(zone_id: &str, execution_zone: &str) -> Vec<Capability> {
        let mut caps = vec![Capability::Triage, Capability::Draft];
        if zone_id == execution_zone {
            caps.push(Capability::ApproveExecute);
        }
        caps
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
            capabilities: Self::default_capabilities("local", "local"),
            execution_zone: "local".to_string(),
        }
    }
}

/// Orchestration cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard timeout of one reasoning call, in seconds.
    pub reasoning_timeout_secs: u64,
    /// Failed reasoning attempts before a record is escalated.
    pub max_attempts: u32,
    /// Age in seconds after which an In_Progress record is requeued.
    pub retry_after_secs: u64,
    /// Hard iteration cap of the multi-step plan loop.
    pub max_plan_iterations: u32,
    /// Unchecked checklist items that make a task complex.
    pub complex_checklist_threshold: usize,
    /// Age in seconds after which a `started` ledger entry is considered
    /// abandoned by a crashed executor.
    pub execution_stale_secs: u64,
}

impl OrchestratorConfig {
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reasoning_timeout_secs: 120,
            max_attempts: 3,
            retry_after_secs: 300,
            max_plan_iterations: 10,
            complex_checklist_threshold: 5,
            execution_stale_secs: 600,
        }
    }
}

/// Approval policy thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Invoices and payments at or above this amount need sign-off.
    pub payment_threshold: f64,
    /// Payees that have been paid before. Any other payee needs sign-off.
    pub known_payees: Vec<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            payment_threshold: 100.0,
            known_payees: Vec::new(),
        }
    }
}

/// Backoff and circuit-breaker settings of the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of any backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the un-jittered delay, in [0, 1).
    pub jitter_fraction: f64,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before admitting a probe call.
    pub probe_interval_secs: u64,
    /// Attempts made by one retried call before giving up.
    pub max_attempts_per_call: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_fraction: 0.1,
            failure_threshold: 5,
            probe_interval_secs: 60,
            max_attempts_per_call: 3,
        }
    }
}

/// Job intervals of the cooperative scheduler, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Loop granularity in milliseconds.
    pub tick_ms: u64,
    pub triage_interval_secs: u64,
    pub approval_interval_secs: u64,
    /// Full inbox sweep behind the filesystem events.
    pub inbox_poll_secs: u64,
    pub source_poll_secs: u64,
    pub draft_interval_secs: u64,
    pub report_interval_secs: u64,
    pub weekly_report_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            triage_interval_secs: 30,
            approval_interval_secs: 30,
            inbox_poll_secs: 60,
            source_poll_secs: 120,
            draft_interval_secs: 86_400,
            report_interval_secs: 86_400,
            weekly_report_interval_secs: 604_800,
        }
    }
}

/// Vault replication between zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub remote: String,
    pub branch: String,
    /// Timeout of a single git invocation, in seconds.
    pub git_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            remote: "origin".to_string(),
            branch: "main".to_string(),
            git_timeout_secs: 60,
        }
    }
}

/// Health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Reasoning capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Command and leading arguments; the prompt is appended last.
    pub command: Vec<String>,
    /// Working directory of the command. Defaults to the vault root.
    pub working_dir: Option<PathBuf>,
    /// Optional rules document (relative to the vault) prepended to prompts.
    pub handbook: String,
    /// Optional goals document (relative to the vault) used for drafts.
    pub goals: String,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            working_dir: None,
            handbook: "Company_Handbook.md".to_string(),
            goals: "Business_Goals.md".to_string(),
        }
    }
}

/// External executor command for one action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Command and arguments; the request JSON is written to stdin.
    pub command: Vec<String>,
    /// Health-monitor service name. Defaults to the action name.
    #[serde(default)]
    pub service: Option<String>,
    /// Timeout of one invocation, in seconds.
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

fn default_executor_timeout() -> u64 {
    60
}

/// Draft generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    /// Platforms to draft for: linkedin, facebook, twitter, instagram.
    pub platforms: Vec<String>,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            platforms: vec!["linkedin".to_string()],
        }
    }
}

/// Input watchers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub inbox_enabled: bool,
    /// Spool directory of JSON items written by external fetchers.
    pub spool_dir: Option<PathBuf>,
    /// Kind assigned to spooled items without an explicit kind.
    pub spool_kind: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox_enabled: true,
            spool_dir: None,
            spool_kind: "email".to_string(),
        }
    }
}
