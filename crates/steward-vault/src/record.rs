//! Typed view over a record document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use steward_core::types::{Action, Priority, TaskKind, TaskState};

use crate::codec::Document;
use crate::error::CodecError;

// =============================================================================
// Header keys
// =============================================================================

pub const KEY_TYPE: &str = "type";
pub const KEY_ACTION: &str = "action";
pub const KEY_STATUS: &str = "status";
pub const KEY_PRIORITY: &str = "priority";
pub const KEY_CREATED: &str = "created";
pub const KEY_ZONE_ORIGIN: &str = "zone_origin";
pub const KEY_ATTEMPTS: &str = "attempts";
pub const KEY_LAST_ATTEMPT: &str = "last_attempt";
pub const KEY_OUTCOME: &str = "outcome";
pub const KEY_FAILURE_REASON: &str = "failure_reason";
pub const KEY_SOURCE_TASK: &str = "source_task";
pub const KEY_APPROVAL_REF: &str = "approval_ref";
pub const KEY_EXECUTED_AT: &str = "executed_at";
pub const KEY_AUTO_APPROVED: &str = "auto_approved";
pub const KEY_SUMMARY: &str = "summary";
pub const KEY_NEEDS_PLAN: &str = "needs_plan";
pub const KEY_PLAN_STEP: &str = "plan_step";
pub const KEY_PLAN_ITERATION: &str = "plan_iteration";
pub const KEY_PLAN_MAX_ITERATIONS: &str = "plan_max_iterations";

/// Header keys owned by the orchestrator. Everything else is action payload.
pub const RESERVED_KEYS: &[&str] = &[
    KEY_TYPE,
    KEY_ACTION,
    KEY_STATUS,
    KEY_PRIORITY,
    KEY_CREATED,
    KEY_ZONE_ORIGIN,
    KEY_ATTEMPTS,
    KEY_LAST_ATTEMPT,
    KEY_OUTCOME,
    KEY_FAILURE_REASON,
    KEY_SOURCE_TASK,
    KEY_APPROVAL_REF,
    KEY_EXECUTED_AT,
    KEY_AUTO_APPROVED,
    KEY_SUMMARY,
    KEY_NEEDS_PLAN,
    KEY_PLAN_STEP,
    KEY_PLAN_ITERATION,
    KEY_PLAN_MAX_ITERATIONS,
];

/// How a record ended up in Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    Rejected,
    Escalated,
    DryRun,
}

impl Outcome {
    /// Failure-flagged terminal outcomes.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Escalated)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Rejected => write!(f, "rejected"),
            Outcome::Escalated => write!(f, "escalated"),
            Outcome::DryRun => write!(f, "dry_run"),
        }
    }
}

impl FromStr for Outcome {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failed" | "failure" => Ok(Outcome::Failed),
            "rejected" => Ok(Outcome::Rejected),
            "escalated" => Ok(Outcome::Escalated),
            "dry_run" => Ok(Outcome::DryRun),
            _ => Err(format!("Unknown outcome: {}", s)),
        }
    }
}

// =============================================================================
// TaskRecord
// =============================================================================

/// A unit of work.
///
/// The core fields are typed; every other header field stays in the
/// underlying document in file order. `state` is where the record was read
/// from; it is never trusted from the header.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub action: Action,
    pub priority: Priority,
    pub created_at: Option<DateTime<Utc>>,
    pub zone_origin: Option<String>,
    pub state: Option<TaskState>,
    doc: Document,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            action: Action::None,
            priority: Priority::default(),
            created_at: Some(Utc::now()),
            zone_origin: None,
            state: None,
            doc: Document::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_zone_origin(mut self, zone: impl Into<String>) -> Self {
        self.zone_origin = Some(zone.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.doc.set(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.doc.body = body.into();
        self
    }

    /// Build the typed view of a parsed document. The id is the file stem.
    pub fn from_document(id: impl Into<String>, doc: Document) -> Result<Self, CodecError> {
        let kind = doc
            .get(KEY_TYPE)
            .filter(|v| !v.is_empty())
            .ok_or(CodecError::MissingField(KEY_TYPE))?;
        let kind = match TaskKind::from_str(kind) {
            Ok(kind) => kind,
            Err(never) => match never {},
        };

        let action = match doc.get(KEY_ACTION) {
            Some(value) => Action::from_str(value).map_err(|reason| CodecError::InvalidField {
                field: KEY_ACTION,
                reason,
            })?,
            None => Action::None,
        };

        let priority = match doc.get(KEY_PRIORITY) {
            Some(value) if !value.is_empty() => {
                Priority::from_str(value).map_err(|reason| CodecError::InvalidField {
                    field: KEY_PRIORITY,
                    reason,
                })?
            }
            _ => Priority::default(),
        };

        let created_at = match doc.get(KEY_CREATED) {
            Some(value) if !value.is_empty() => {
                Some(parse_timestamp(value).ok_or_else(|| CodecError::InvalidField {
                    field: KEY_CREATED,
                    reason: format!("unrecognised timestamp '{}'", value),
                })?)
            }
            _ => None,
        };

        let zone_origin = doc
            .get(KEY_ZONE_ORIGIN)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Ok(Self {
            id: id.into(),
            kind,
            action,
            priority,
            created_at,
            zone_origin,
            state: None,
            doc,
        })
    }

    /// Parse file text into a record.
    pub fn parse(id: impl Into<String>, text: &str) -> Result<Self, CodecError> {
        Self::from_document(id, Document::parse(text)?)
    }

    /// Project the record into a document with `status` taken from `state`.
    pub fn to_document(&self, state: TaskState) -> Document {
        let mut doc = self.doc.clone();
        doc.set(KEY_TYPE, self.kind.to_string());
        doc.set(KEY_ACTION, self.action.to_string());
        doc.set(KEY_PRIORITY, self.priority.to_string());
        doc.set(KEY_STATUS, state.folder());
        match self.created_at {
            Some(created) => doc.set(KEY_CREATED, format_timestamp(created)),
            None => {
                doc.remove(KEY_CREATED);
            }
        }
        match &self.zone_origin {
            Some(zone) => doc.set(KEY_ZONE_ORIGIN, zone),
            None => {
                doc.remove(KEY_ZONE_ORIGIN);
            }
        }
        doc
    }

    /// Render the record as file text for `state`.
    pub fn render(&self, state: TaskState) -> String {
        self.to_document(state).render()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.doc.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl AsRef<str>) {
        self.doc.set(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.doc.remove(key)
    }

    pub fn body(&self) -> &str {
        &self.doc.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.doc.body = body.into();
    }

    /// Action-specific fields: every header field not owned by the orchestrator.
    pub fn payload(&self) -> BTreeMap<String, String> {
        self.doc
            .fields()
            .filter(|(key, _)| !RESERVED_KEYS.contains(key))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    /// Currency payload value; see [`parse_amount`].
    pub fn amount(&self, key: &str) -> Option<f64> {
        self.doc.get(key).and_then(parse_amount)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.doc.get(key).map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("true" | "yes" | "1")
        )
    }

    pub fn attempts(&self) -> u32 {
        self.doc
            .get(KEY_ATTEMPTS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.doc.set(KEY_ATTEMPTS, attempts.to_string());
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.doc.get(KEY_LAST_ATTEMPT).and_then(parse_timestamp)
    }

    pub fn set_last_attempt(&mut self, at: DateTime<Utc>) {
        self.doc.set(KEY_LAST_ATTEMPT, format_timestamp(at));
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.doc.get(KEY_OUTCOME).and_then(|v| v.parse().ok())
    }

    /// Record the terminal outcome, with a reason for failure outcomes.
    pub fn set_outcome(&mut self, outcome: Outcome, reason: Option<&str>) {
        self.doc.set(KEY_OUTCOME, outcome.to_string());
        match reason {
            Some(reason) => self.doc.set(KEY_FAILURE_REASON, reason),
            None => {
                self.doc.remove(KEY_FAILURE_REASON);
            }
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.doc.get(KEY_FAILURE_REASON)
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Canonical header timestamp: RFC 3339, second precision, UTC.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a header timestamp. Accepts RFC 3339, naive date-times (taken as
/// UTC) and plain dates.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Parse a currency amount strictly.
///
/// Accepts an optional symbol and an optional three-letter code around a
/// number made of digits, `,` thousands groups and at most one `.` with
/// decimals: `$1,250.50`, `1250.5 USD`, `EUR 40`. Shorthand (`5k`),
/// exponents (`1e6`), negative values and other locales (`1.000,00`) are
/// unreadable and yield `None`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let text = text.strip_prefix(CURRENCY_SYMBOLS).unwrap_or(text);
    let text = text.strip_suffix(CURRENCY_SYMBOLS).unwrap_or(text);

    let parts: Vec<&str> = text.split_whitespace().collect();
    let number = match parts.as_slice() {
        [number] => *number,
        [code, number] | [number, code] if is_currency_code(code) => *number,
        _ => return None,
    };
    parse_grouped_number(number)
}

fn is_currency_code(part: &str) -> bool {
    part.len() == 3 && part.bytes().all(|b| b.is_ascii_uppercase())
}

fn parse_grouped_number(text: &str) -> Option<f64> {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let (int, frac) = match text.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (text, None),
    };
    if frac.is_some_and(|f| !all_digits(f)) {
        return None;
    }

    let groups: Vec<&str> = int.split(',').collect();
    let (head, tail) = groups.split_first()?;
    if !all_digits(head) || (!tail.is_empty() && head.len() > 3) {
        return None;
    }
    if !tail.iter().all(|g| g.len() == 3 && all_digits(g)) {
        return None;
    }

    let mut normalized: String = int.chars().filter(|c| *c != ',').collect();
    if let Some(frac) = frac {
        normalized.push('.');
        normalized.push_str(frac);
    }
    normalized.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EMAIL: &str = "---\n\
type: email\n\
from: client@example.com\n\
action: email_send\n\
priority: high\n\
status: Inbox\n\
created: 2026-01-07T10:30:00Z\n\
to: client@example.com\n\
subject: Invoice\n\
---\n\
Body text\n";

    #[test]
    fn test_parse_core_fields() {
        let record = TaskRecord::parse("EMAIL_1", EMAIL).unwrap();
        assert_eq!(record.id, "EMAIL_1");
        assert_eq!(record.kind, TaskKind::Email);
        assert_eq!(record.action, Action::EmailSend);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(
            record.created_at,
            Some(Utc.with_ymd_and_hms(2026, 1, 7, 10, 30, 0).unwrap())
        );
        assert_eq!(record.body(), "Body text\n");
        assert_eq!(record.state, None);
    }

    #[test]
    fn test_payload_excludes_reserved_keys() {
        let record = TaskRecord::parse("EMAIL_1", EMAIL).unwrap();
        let payload = record.payload();
        assert_eq!(payload.len(), 3);
        assert_eq!(payload["to"], "client@example.com");
        assert_eq!(payload["subject"], "Invoice");
        assert!(!payload.contains_key("status"));
    }

    #[test]
    fn test_status_is_projected_from_state() {
        let record = TaskRecord::parse("EMAIL_1", EMAIL).unwrap();
        let text = record.render(TaskState::Done);
        assert!(text.contains("status: Done\n"));
        assert!(!text.contains("status: Inbox"));
    }

    #[test]
    fn test_render_keeps_field_order() {
        let record = TaskRecord::parse("EMAIL_1", EMAIL).unwrap();
        let text = record.render(TaskState::Inbox);
        assert_eq!(text, EMAIL);
    }

    #[test]
    fn test_semantic_round_trip() {
        let record = TaskRecord::new("INV_7", TaskKind::AccountingTask)
            .with_action(Action::CreateInvoice)
            .with_priority(Priority::Critical)
            .with_zone_origin("cloud")
            .with_field("customer", "ACME Ltd")
            .with_field("amount", "1200.00")
            .with_body("Invoice for January\n");
        let text = record.render(TaskState::NeedsAction);
        let parsed = TaskRecord::parse("INV_7", &text).unwrap();
        assert_eq!(parsed.kind, record.kind);
        assert_eq!(parsed.action, record.action);
        assert_eq!(parsed.priority, record.priority);
        assert_eq!(parsed.zone_origin.as_deref(), Some("cloud"));
        assert_eq!(parsed.payload(), record.payload());
        assert_eq!(parsed.body(), record.body());
        assert_eq!(
            parsed.created_at.map(format_timestamp),
            record.created_at.map(format_timestamp)
        );
    }

    #[test]
    fn test_missing_type_is_error() {
        let err = TaskRecord::parse("X", "---\naction: none\n---\n").unwrap_err();
        assert_eq!(err, CodecError::MissingField("type"));
    }

    #[test]
    fn test_unknown_action_is_error() {
        let err = TaskRecord::parse("X", "---\ntype: email\naction: wire_money\n---\n").unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "action", .. }));
    }

    #[test]
    fn test_legacy_action_names() {
        let record =
            TaskRecord::parse("X", "---\ntype: accounting\naction: odoo_invoice\n---\n").unwrap();
        assert_eq!(record.kind, TaskKind::AccountingTask);
        assert_eq!(record.action, Action::CreateInvoice);
    }

    #[test]
    fn test_defaults_when_optional_fields_absent() {
        let record = TaskRecord::parse("X", "---\ntype: file_drop\n---\n").unwrap();
        assert_eq!(record.action, Action::None);
        assert_eq!(record.priority, Priority::Medium);
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_amount_and_flag() {
        let record = TaskRecord::new("P", TaskKind::AccountingTask)
            .with_field("amount", "$1,250.50")
            .with_field("new_payee", "true");
        assert_eq!(record.amount("amount"), Some(1250.5));
        assert!(record.flag("new_payee"));
        assert!(!record.flag("missing"));
        assert_eq!(record.amount("missing"), None);
    }

    #[test]
    fn test_parse_amount_accepts_plain_currency_forms() {
        assert_eq!(parse_amount("40"), Some(40.0));
        assert_eq!(parse_amount("$9,000.00"), Some(9000.0));
        assert_eq!(parse_amount("1,234,567.8"), Some(1234567.8));
        assert_eq!(parse_amount("EUR 99.99"), Some(99.99));
        assert_eq!(parse_amount("1250.50 USD"), Some(1250.5));
        assert_eq!(parse_amount(" £12 "), Some(12.0));
    }

    #[test]
    fn test_parse_amount_rejects_shorthand_and_foreign_formats() {
        for raw in [
            "5k", "1e6", "1.000,00", "1,00", "12,3456", "1.2.3", "-50", "", "$", "lots",
            "5 000", "USD EUR 5", "10.",
        ] {
            assert_eq!(parse_amount(raw), None, "{raw:?} should be unreadable");
        }
    }

    #[test]
    fn test_attempts_and_outcome() {
        let mut record = TaskRecord::new("T", TaskKind::Email);
        assert_eq!(record.attempts(), 0);
        record.set_attempts(2);
        assert_eq!(record.attempts(), 2);

        record.set_outcome(Outcome::Failed, Some("missing field: to"));
        assert_eq!(record.outcome(), Some(Outcome::Failed));
        assert_eq!(record.failure_reason(), Some("missing field: to"));

        record.set_outcome(Outcome::Success, None);
        assert_eq!(record.failure_reason(), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 7, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-07T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-07T12:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-07T10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-07 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-07T10:30:00.123456"), Some(expected + chrono::Duration::microseconds(123456)));
        assert!(parse_timestamp("2026-01-07").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_outcome_display_round_trip() {
        for outcome in [
            Outcome::Success,
            Outcome::Failed,
            Outcome::Rejected,
            Outcome::Escalated,
            Outcome::DryRun,
        ] {
            assert_eq!(outcome.to_string().parse::<Outcome>().unwrap(), outcome);
        }
        assert!(Outcome::Escalated.is_failure());
        assert!(!Outcome::DryRun.is_failure());
    }
}
