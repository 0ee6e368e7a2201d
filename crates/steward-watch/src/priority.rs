//! Priority heuristics for incoming items.

use std::path::Path;

use steward_core::types::Priority;

const PRIORITY_LABELS: &[&str] = &["IMPORTANT", "CATEGORY_PERSONAL"];
const URGENT_KEYWORDS: &[&str] = &["urgent", "asap", "critical", "payment", "invoice"];
const HIGH_KEYWORDS: &[&str] = &["meeting", "deadline", "review", "action required"];
const MEDIUM_KEYWORDS: &[&str] = &["update", "report", "summary", "fyi"];

/// Priority of an email from its subject and mailbox labels.
///
/// Important or personal mail is high, or critical when the subject is
/// urgent or about money. Other mail is ranked by subject keywords alone.
pub fn classify_email_priority(subject: &str, labels: &[String]) -> Priority {
    let subject = subject.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| subject.contains(kw));

    let flagged = labels
        .iter()
        .any(|label| PRIORITY_LABELS.iter().any(|p| label.eq_ignore_ascii_case(p)));
    if flagged {
        if contains_any(URGENT_KEYWORDS) {
            return Priority::Critical;
        }
        return Priority::High;
    }
    if contains_any(HIGH_KEYWORDS) {
        Priority::High
    } else if contains_any(MEDIUM_KEYWORDS) {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Priority of a dropped file from its extension.
pub fn classify_file_priority(path: &Path) -> Priority {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" | "xlsx" | "csv" | "docx" => Priority::High,
        "txt" | "md" | "json" => Priority::Medium,
        _ => Priority::Low,
    }
}
