//! Reasoning capability contract.
//!
//! The reasoning capability is a black box: prompt in, completion out. The
//! orchestrator bounds every call with a timeout and the health monitor.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use steward_core::config::ReasoningConfig;
use steward_core::types::Action;

use crate::error::ReasoningError;
use crate::types::Decision;

#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError>;
}

/// Runs a configured command with the prompt as its final argument.
pub struct CommandReasoner {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandReasoner {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
        }
    }

    pub fn from_config(config: &ReasoningConfig, default_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: Some(
                config
                    .working_dir
                    .clone()
                    .unwrap_or_else(|| default_dir.into()),
            ),
        }
    }
}

#[async_trait]
impl ReasoningClient for CommandReasoner {
    async fn complete(&self, prompt: &str) -> Result<String, ReasoningError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ReasoningError::NotConfigured)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ReasoningError::Failed(format!("Failed to run {}: {}", program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReasoningError::Failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("Invalid fenced JSON regex")
    })
}

/// Extract a decision from a completion.
///
/// Looks for a JSON object (fenced or bare) with `action`, `summary` and
/// `payload`. Free text without JSON is a decision with action `none`. An
/// action name outside the known set is an error.
pub fn parse_decision(completion: &str) -> Result<Decision, String> {
    let candidate = fenced_json()
        .captures(completion)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| {
            let start = completion.find('{')?;
            let end = completion.rfind('}')?;
            (end > start).then(|| &completion[start..=end])
        });

    let object = candidate
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
        .and_then(|value| match value {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        });

    let Some(object) = object else {
        return Ok(Decision {
            action: Action::None,
            summary: summarize(completion),
            payload: BTreeMap::new(),
        });
    };

    let action = match object.get("action").and_then(|v| v.as_str()) {
        Some(name) => Action::from_str(name.trim())?,
        None => Action::None,
    };
    let summary = object
        .get("summary")
        .and_then(|v| v.as_str())
        .map(summarize)
        .unwrap_or_default();
    let payload = object
        .get("payload")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::Null => return None,
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Some((k.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Decision {
        action,
        summary,
        payload,
    })
}

fn summarize(text: &str) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > 300 {
        let mut cut: String = line.chars().take(297).collect();
        cut.push_str("...");
        cut
    } else {
        line
    }
}

/// Prompt asking for a triage decision on one record.
pub fn triage_prompt(handbook: Option<&str>, record_text: &str) -> String {
    let actions: Vec<String> = Action::ALL.iter().map(|a| a.to_string()).collect();
    let mut prompt = String::new();
    if let Some(rules) = handbook.filter(|h| !h.trim().is_empty()) {
        prompt.push_str("Follow these rules:\n");
        prompt.push_str(rules.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Classify the task below and decide the single next action.\n");
    prompt.push_str(&format!("Allowed actions: {}.\n", actions.join(", ")));
    prompt.push_str(
        "Reply with one JSON object: {\"action\": ..., \"summary\": ..., \"payload\": {...}}.\n",
    );
    prompt.push_str("Payload fields: email_send needs to, subject, body; posts need content; ");
    prompt.push_str("create_invoice needs customer, amount; create_payment needs payee, amount.\n\n");
    prompt.push_str("Task:\n");
    prompt.push_str(record_text);
    prompt
}

/// Prompt for one step of a multi-step plan.
pub fn step_prompt(record_text: &str, step_index: usize, step: &str) -> String {
    format!(
        "You are working through a multi-step task. Carry out step {} only and \
         report the result in one short paragraph.\n\nStep: {}\n\nTask:\n{}",
        step_index + 1,
        step,
        record_text
    )
}

/// Prompt asking for a checklist plan.
pub fn planning_prompt(record_text: &str) -> String {
    format!(
        "Break the task below into a short checklist. Reply with one line per \
         step, each starting with \"- [ ] \".\n\nTask:\n{}",
        record_text
    )
}

/// Prompt asking for a social media draft.
pub fn draft_prompt(goals: Option<&str>, platform: &str, limit: Option<usize>) -> String {
    let mut prompt = format!("Write one {} post for the business.", platform);
    if let Some(limit) = limit {
        prompt.push_str(&format!(" Stay under {} characters.", limit));
    }
    if let Some(goals) = goals.filter(|g| !g.trim().is_empty()) {
        prompt.push_str("\n\nBusiness goals:\n");
        prompt.push_str(goals.trim());
    }
    prompt.push_str("\n\nReply with the post text only.");
    prompt
}
