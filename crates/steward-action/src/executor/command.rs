//! Executor that delegates to an external command.
//!
//! The request is written to the command's stdin as JSON. Exit status 0 is
//! success (stdout becomes the detail), 2 is a permanent validation failure,
//! anything else is transient.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use steward_core::config::ExecutorConfig;
use steward_core::types::Action;

use crate::error::ActionError;
use crate::executor::ActionExecutor;
use crate::types::{ExecutionRequest, ExecutionResult};

/// Exit status an executor command uses to reject its input.
pub const EXIT_INVALID: i32 = 2;

pub struct CommandExecutor {
    action: Action,
    service: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(action: Action, command: Vec<String>, timeout: Duration) -> Result<Self, ActionError> {
        let mut parts = command.into_iter();
        let program = parts.next().filter(|p| !p.trim().is_empty()).ok_or_else(|| {
            ActionError::PermanentValidation(format!("empty executor command for {}", action))
        })?;
        Ok(Self {
            action,
            service: action.to_string(),
            program,
            args: parts.collect(),
            working_dir: None,
            timeout,
        })
    }

    pub fn from_config(action: Action, config: &ExecutorConfig) -> Result<Self, ActionError> {
        let mut executor = Self::new(
            action,
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        if let Some(service) = &config.service {
            executor.service = service.clone();
        }
        Ok(executor)
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output, ActionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ActionError::transient(&self.service, format!("Failed to run {}: {}", self.program, e))
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| ActionError::transient(&self.service, format!("stdin: {}", e)))?;
        }
        child
            .wait_with_output()
            .await
            .map_err(|e| ActionError::transient(&self.service, e.to_string()))
    }
}

#[async_trait]
impl ActionExecutor for CommandExecutor {
    fn action(&self) -> Action {
        self.action
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ActionError> {
        let input = serde_json::to_vec(request)
            .map_err(|e| ActionError::PermanentValidation(e.to_string()))?;

        let output = tokio::time::timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| ActionError::Timeout(self.timeout.as_secs()))??;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        match output.status.code() {
            Some(0) => {
                tracing::info!(
                    task_id = %request.task_id,
                    action = %self.action,
                    "Executor command succeeded"
                );
                Ok(ExecutionResult {
                    dry_run: false,
                    detail: (!stdout.is_empty()).then_some(stdout),
                })
            }
            Some(EXIT_INVALID) => Err(ActionError::PermanentValidation(if stderr.is_empty() {
                format!("{} rejected the request", self.program)
            } else {
                stderr
            })),
            code => Err(ActionError::transient(
                &self.service,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string()),
                    stderr
                ),
            )),
        }
    }

    fn describe(&self, request: &ExecutionRequest) -> String {
        let target = match self.action {
            Action::EmailSend => request.field("to"),
            Action::CreateInvoice => request.field("customer"),
            Action::CreatePayment => request.field("payee"),
            _ => None,
        };
        match target {
            Some(target) => format!("{} to {} via {}", self.action, target, self.program),
            None => format!("{} via {}", self.action, self.program),
        }
    }
}
