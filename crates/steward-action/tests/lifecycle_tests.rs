//! End-to-end lifecycle scenarios against a real vault directory.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use steward_action::{
    ActionError, ActionExecutor, ApprovalPolicy, ExecutionRequest, ExecutionResult,
    ExecutorRegistry, Orchestrator, ReasoningClient, ReasoningError, RetryHealthMonitor,
    ZoneCoordinator,
};
use steward_core::config::{ApprovalConfig, RetryConfig};
use steward_core::types::{Action, Capability, Priority, TaskKind, TaskState};
use steward_vault::record::KEY_EXECUTED_AT;
use steward_vault::{AuditResult, Outcome, TaskRecord, VaultStore};

// =============================================================================
// Doubles
// =============================================================================

struct CountingExecutor {
    action: Action,
    calls: AtomicU32,
}

impl CountingExecutor {
    fn new(action: Action) -> Arc<Self> {
        Arc::new(Self {
            action,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for CountingExecutor {
    fn action(&self) -> Action {
        self.action
    }

    fn service(&self) -> &str {
        "social"
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(ExecutionResult {
            dry_run: false,
            detail: Some(format!("post for {}", request.task_id)),
        })
    }

    fn describe(&self, request: &ExecutionRequest) -> String {
        format!("post {}", request.task_id)
    }
}

struct FixedReasoner {
    reply: String,
    calls: AtomicU32,
}

impl FixedReasoner {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ReasoningClient for FixedReasoner {
    async fn complete(&self, _prompt: &str) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.reply.clone())
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

const EXECUTING: &[Capability] = &[Capability::ApproveExecute];
const CLOUD: &[Capability] = &[Capability::Triage, Capability::Draft];

fn orchestrator(
    root: &std::path::Path,
    zone: &str,
    capabilities: &[Capability],
    executor: Arc<CountingExecutor>,
    reasoner: Arc<FixedReasoner>,
) -> Orchestrator {
    let store = VaultStore::open(root).unwrap();
    let mut registry = ExecutorRegistry::new(false);
    registry.register(executor);
    Orchestrator::new(
        store,
        ZoneCoordinator::new(zone, capabilities.iter().copied()),
        registry,
        reasoner,
        Arc::new(RetryHealthMonitor::new(&RetryConfig::default())),
    )
    .with_policy(ApprovalPolicy::new(&ApprovalConfig {
        payment_threshold: 100.0,
        known_payees: vec!["ACME Supplies".to_string()],
    }))
}

fn linkedin_approval(id: &str) -> TaskRecord {
    TaskRecord::new(id, TaskKind::ApprovalRequest)
        .with_action(Action::LinkedinPost)
        .with_priority(Priority::Medium)
        .with_field("content", "Three lessons from our first year")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_approved_linkedin_post_executes_once() {
    let dir = TempDir::new().unwrap();
    let executor = CountingExecutor::new(Action::LinkedinPost);
    let orch = orchestrator(dir.path(), "local", EXECUTING, executor.clone(), FixedReasoner::new(""));
    let store = orch.store().clone();

    store
        .create(TaskState::PendingApproval, &linkedin_approval("APPROVAL_POST_1"))
        .unwrap();
    // Nothing runs until a human moves the record.
    orch.sweep_approved().await.unwrap();
    assert_eq!(executor.calls(), 0);

    assert!(store
        .claim("APPROVAL_POST_1", TaskState::PendingApproval, TaskState::Approved)
        .unwrap());
    let report = orch.sweep_approved().await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(executor.calls(), 1);

    let done = store.read_in(TaskState::Done, "APPROVAL_POST_1").unwrap();
    assert_eq!(done.outcome(), Some(Outcome::Success));
    assert!(done.get(KEY_EXECUTED_AT).is_some());
    assert_eq!(store.locate_all("APPROVAL_POST_1"), vec![TaskState::Done]);

    let entries = orch.audit().read_day(Utc::now().date_naive()).unwrap();
    let successes: Vec<_> = entries
        .iter()
        .filter(|e| e.task_id == "APPROVAL_POST_1" && e.result == AuditResult::Success)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].action, "linkedin_post");
}

#[tokio::test]
async fn test_double_trigger_executes_once() {
    let dir = TempDir::new().unwrap();
    let executor = CountingExecutor::new(Action::LinkedinPost);
    let orch = orchestrator(dir.path(), "local", EXECUTING, executor.clone(), FixedReasoner::new(""));
    orch.store()
        .create(TaskState::Approved, &linkedin_approval("APPROVAL_POST_2"))
        .unwrap();

    let (first, second) = tokio::join!(orch.sweep_approved(), orch.sweep_approved());
    let first = first.unwrap();
    let second = second.unwrap();
    let third = orch.sweep_approved().await.unwrap();

    assert_eq!(executor.calls(), 1);
    assert_eq!(first.executed + second.executed + third.executed, 1);
    assert_eq!(orch.store().count(TaskState::Done).unwrap(), 1);
    assert_eq!(orch.store().count(TaskState::Approved).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_triage_cycles_claim_each_record_once() {
    let dir = TempDir::new().unwrap();
    let reasoner = FixedReasoner::new(r#"{"action": "none", "summary": "FYI"}"#);
    let executor = CountingExecutor::new(Action::LinkedinPost);
    let a = Arc::new(orchestrator(dir.path(), "cloud", CLOUD, executor.clone(), reasoner.clone()));
    let b = Arc::new(orchestrator(dir.path(), "cloud", CLOUD, executor, reasoner.clone()));

    for i in 0..8 {
        let record = TaskRecord::new(format!("EMAIL_{}", i), TaskKind::Email).with_body("Update");
        a.store().create(TaskState::NeedsAction, &record).unwrap();
    }

    let left = tokio::spawn({
        let a = Arc::clone(&a);
        async move { a.run_triage_cycle().await }
    });
    let right = tokio::spawn({
        let b = Arc::clone(&b);
        async move { b.run_triage_cycle().await }
    });
    let left = left.await.unwrap().unwrap();
    let right = right.await.unwrap().unwrap();

    assert_eq!(left.claimed + right.claimed, 8);
    assert_eq!(left.completed + right.completed, 8);
    assert_eq!(reasoner.calls.load(Ordering::SeqCst), 8);
    assert_eq!(a.store().count(TaskState::Done).unwrap(), 8);
    assert_eq!(a.store().count(TaskState::InProgress).unwrap(), 0);
    for i in 0..8 {
        assert_eq!(a.store().locate_all(&format!("EMAIL_{}", i)).len(), 1);
    }
}

#[tokio::test]
async fn test_zone_without_execution_never_calls_executors() {
    let dir = TempDir::new().unwrap();
    let executor = CountingExecutor::new(Action::LinkedinPost);
    let orch = orchestrator(dir.path(), "cloud", CLOUD, executor.clone(), FixedReasoner::new(""));
    orch.store()
        .create(TaskState::Approved, &linkedin_approval("APPROVAL_A"))
        .unwrap();
    orch.store()
        .create(TaskState::Approved, &linkedin_approval("APPROVAL_B"))
        .unwrap();

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let report = {
        let _guard = tracing::subscriber::set_default(subscriber);
        orch.sweep_approved().await.unwrap()
    };

    assert_eq!(report.skipped, 2);
    assert_eq!(executor.calls(), 0);
    assert_eq!(orch.store().count(TaskState::Approved).unwrap(), 2);
    let text = logs.text();
    assert_eq!(text.matches("skipped: zone policy").count(), 2);
    assert!(text.contains("APPROVAL_A"));
    assert!(text.contains("APPROVAL_B"));
}

#[tokio::test]
async fn test_payment_over_threshold_waits_for_approval() {
    let dir = TempDir::new().unwrap();
    let executor = CountingExecutor::new(Action::CreatePayment);
    let reasoner = FixedReasoner::new(
        r#"{"action": "create_payment", "summary": "Pay supplier", "payload": {"payee": "ACME Supplies", "amount": "2500"}}"#,
    );
    let all = &[Capability::Triage, Capability::Draft, Capability::ApproveExecute];
    let orch = orchestrator(dir.path(), "local", all, executor.clone(), reasoner);
    let bill = TaskRecord::new("BILL_1", TaskKind::AccountingTask)
        .with_priority(Priority::High)
        .with_body("Invoice #88 from ACME Supplies");
    orch.store().create(TaskState::NeedsAction, &bill).unwrap();

    let cycle = orch.run_triage_cycle().await.unwrap();
    assert_eq!(cycle.awaiting_approval, 1);
    let sweep = orch.sweep_approved().await.unwrap();
    assert_eq!(sweep.executed, 0);
    assert_eq!(executor.calls(), 0);

    let request = orch
        .store()
        .read_in(TaskState::PendingApproval, "APPROVAL_BILL_1")
        .unwrap();
    assert_eq!(request.action, Action::CreatePayment);
    assert_eq!(request.get("amount"), Some("2500"));
}
