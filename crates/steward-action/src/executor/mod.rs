//! Action executor registry and trait definition.
//!
//! Defines the `ActionExecutor` async trait and the registry that dispatches
//! an approved action to its executor through the health monitor.

pub mod command;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use steward_core::types::Action;
use steward_vault::record::parse_amount;

use crate::error::ActionError;
use crate::retry::RetryHealthMonitor;
use crate::types::{ExecutionRequest, ExecutionResult};

pub use command::CommandExecutor;

/// One side-effecting operation (send, post, invoice).
///
/// Implementations must be idempotent per `task_id`: a retried call after
/// an ambiguous failure may reach the executor twice.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn action(&self) -> Action;

    /// Health-monitor service name.
    fn service(&self) -> &str;

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ActionError>;

    /// Human-readable description of what `execute` would do.
    fn describe(&self, request: &ExecutionRequest) -> String;
}

pub struct ExecutorRegistry {
    executors: HashMap<Action, Arc<dyn ActionExecutor>>,
    dry_run: bool,
}

impl ExecutorRegistry {
    pub fn new(dry_run: bool) -> Self {
        Self {
            executors: HashMap::new(),
            dry_run,
        }
    }

    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.action(), executor);
    }

    pub fn get(&self, action: Action) -> Option<&Arc<dyn ActionExecutor>> {
        self.executors.get(&action)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Service names of every registered executor.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .executors
            .values()
            .map(|e| e.service().to_string())
            .collect();
        services.sort();
        services.dedup();
        services
    }

    /// Validate the payload and run the matching executor under the monitor.
    ///
    /// In dry-run mode the intended effect is logged and success returned
    /// without invoking anything.
    pub async fn execute(
        &self,
        monitor: &RetryHealthMonitor,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ActionError> {
        validate_payload(request)?;

        let executor = self.executors.get(&request.action);
        if self.dry_run {
            let description = match executor {
                Some(executor) => executor.describe(request),
                None => format!("{} for {}", request.action, request.task_id),
            };
            info!(
                task_id = %request.task_id,
                action = %request.action,
                "DRY_RUN: would execute {}",
                description
            );
            return Ok(ExecutionResult {
                dry_run: true,
                detail: Some(description),
            });
        }

        let executor = executor.ok_or(ActionError::UnregisteredExecutor(request.action))?;
        monitor
            .call_with_retry(executor.service(), || executor.execute(request))
            .await
    }
}

/// Check the fields an action cannot run without.
pub fn validate_payload(request: &ExecutionRequest) -> Result<(), ActionError> {
    let required: &[&str] = match request.action {
        Action::None => {
            return Err(ActionError::PermanentValidation(
                "record has no action to execute".to_string(),
            ))
        }
        Action::EmailSend => &["to", "subject"],
        Action::LinkedinPost | Action::FacebookPost | Action::TwitterPost | Action::InstagramPost => {
            &["content"]
        }
        Action::CreateInvoice => &["customer", "amount"],
        Action::CreatePayment => &["payee", "amount"],
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| request.field(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ActionError::PermanentValidation(format!(
            "missing field: {}",
            missing.join(", ")
        )));
    }

    if request.action.is_financial() {
        let amount = request.field("amount").unwrap_or_default();
        match parse_amount(amount) {
            Some(value) if value > 0.0 => {}
            _ => {
                return Err(ActionError::PermanentValidation(format!(
                    "invalid amount: {}",
                    amount
                )))
            }
        }
    }

    if request.action == Action::TwitterPost {
        if let Some(content) = request.field("content") {
            if content.chars().count() > 280 {
                return Err(ActionError::PermanentValidation(
                    "twitter content exceeds 280 characters".to_string(),
                ));
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeExecutor;
    use super::*;
    use std::collections::BTreeMap;
    use steward_core::config::RetryConfig;

    fn request(action: Action, fields: &[(&str, &str)]) -> ExecutionRequest {
        ExecutionRequest {
            task_id: "T1".to_string(),
            action,
            payload: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            body: String::new(),
            dry_run: false,
        }
    }

    fn monitor() -> RetryHealthMonitor {
        RetryHealthMonitor::new(&RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_validate_email_requires_to_and_subject() {
        let err = validate_payload(&request(Action::EmailSend, &[("to", "a@b.c")])).unwrap_err();
        assert_eq!(err.to_string(), "Payload validation failed: missing field: subject");
        assert!(validate_payload(&request(
            Action::EmailSend,
            &[("to", "a@b.c"), ("subject", "Hi")]
        ))
        .is_ok());
    }

    #[test]
    fn test_validate_post_requires_content() {
        assert!(validate_payload(&request(Action::LinkedinPost, &[])).is_err());
        assert!(validate_payload(&request(Action::LinkedinPost, &[("content", "Hello")])).is_ok());
    }

    #[test]
    fn test_validate_financial_amount() {
        let bad = request(Action::CreateInvoice, &[("customer", "ACME"), ("amount", "lots")]);
        assert!(validate_payload(&bad).unwrap_err().is_permanent());
        let ok = request(Action::CreateInvoice, &[("customer", "ACME"), ("amount", "$1,200")]);
        assert!(validate_payload(&ok).is_ok());
        for amount in ["5k", "1e6", "1.000,00", "0"] {
            let bad = request(Action::CreatePayment, &[("payee", "ACME"), ("amount", amount)]);
            assert!(validate_payload(&bad).unwrap_err().is_permanent(), "{amount}");
        }
        let missing = request(Action::CreatePayment, &[("amount", "10")]);
        assert!(validate_payload(&missing).is_err());
    }

    #[test]
    fn test_validate_twitter_length() {
        let long = "x".repeat(281);
        let err = validate_payload(&request(Action::TwitterPost, &[("content", &long)])).unwrap_err();
        assert!(err.to_string().contains("280"));
    }

    #[test]
    fn test_validate_none_action() {
        assert!(validate_payload(&request(Action::None, &[])).is_err());
    }

    #[tokio::test]
    async fn test_execute_dispatches_to_registered_executor() {
        let fake = Arc::new(FakeExecutor::new(Action::LinkedinPost));
        let mut registry = ExecutorRegistry::new(false);
        registry.register(fake.clone());
        let result = registry
            .execute(&monitor(), &request(Action::LinkedinPost, &[("content", "Hi")]))
            .await
            .unwrap();
        assert!(!result.dry_run);
        assert_eq!(result.detail.as_deref(), Some("done T1"));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_execute_unregistered_executor() {
        let registry = ExecutorRegistry::new(false);
        let err = registry
            .execute(&monitor(), &request(Action::LinkedinPost, &[("content", "Hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::UnregisteredExecutor(Action::LinkedinPost)));
    }

    #[tokio::test]
    async fn test_dry_run_never_invokes_executor() {
        let fake = Arc::new(FakeExecutor::new(Action::EmailSend));
        let mut registry = ExecutorRegistry::new(true);
        registry.register(fake.clone());
        let result = registry
            .execute(
                &monitor(),
                &request(Action::EmailSend, &[("to", "a@b.c"), ("subject", "Hi")]),
            )
            .await
            .unwrap();
        assert!(result.dry_run);
        assert_eq!(result.detail.as_deref(), Some("fake email_send for T1"));
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_still_validates() {
        let registry = ExecutorRegistry::new(true);
        let err = registry
            .execute(&monitor(), &request(Action::EmailSend, &[]))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_execute_retries_transient_failures() {
        let fake = Arc::new(FakeExecutor::failing_with(
            Action::CreateInvoice,
            vec![ActionError::transient("fake", "503")],
        ));
        let mut registry = ExecutorRegistry::new(false);
        registry.register(fake.clone());
        registry
            .execute(
                &monitor(),
                &request(Action::CreateInvoice, &[("customer", "ACME"), ("amount", "10")]),
            )
            .await
            .unwrap();
        assert_eq!(fake.calls(), 2);
    }

    #[test]
    fn test_services() {
        let mut registry = ExecutorRegistry::new(false);
        registry.register(Arc::new(FakeExecutor::new(Action::EmailSend)));
        registry.register(Arc::new(FakeExecutor::new(Action::LinkedinPost)));
        assert_eq!(registry.services(), vec!["fake"]);
    }
}
