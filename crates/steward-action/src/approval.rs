//! Approval gate policy.
//!
//! Decides, from the effective action and the record's own payload, whether
//! a human must sign off before anything is executed. The reasoning output
//! never gets a say here.

use steward_core::config::ApprovalConfig;
use steward_core::types::Action;
use steward_vault::TaskRecord;

/// Why an action needs human sign-off.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalReason {
    ExternalCommunication,
    Posting,
    AmountAtThreshold { amount: f64, threshold: f64 },
    UnknownAmount,
    NewPayee(String),
}

impl std::fmt::Display for ApprovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalReason::ExternalCommunication => write!(f, "external communication"),
            ApprovalReason::Posting => write!(f, "public posting"),
            ApprovalReason::AmountAtThreshold { amount, threshold } => {
                write!(f, "amount {:.2} is at or above threshold {:.2}", amount, threshold)
            }
            ApprovalReason::UnknownAmount => write!(f, "amount missing or unreadable"),
            ApprovalReason::NewPayee(payee) => write!(f, "new payee: {}", payee),
        }
    }
}

pub struct ApprovalPolicy {
    payment_threshold: f64,
    known_payees: Vec<String>,
}

impl ApprovalPolicy {
    pub fn new(config: &ApprovalConfig) -> Self {
        Self {
            payment_threshold: config.payment_threshold,
            known_payees: config
                .known_payees
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
        }
    }

    /// Reason sign-off is required, or `None` when the action may run
    /// unattended.
    pub fn review(&self, action: Action, record: &TaskRecord) -> Option<ApprovalReason> {
        match action {
            Action::None => None,
            Action::EmailSend => Some(ApprovalReason::ExternalCommunication),
            a if a.is_post() => Some(ApprovalReason::Posting),
            Action::CreateInvoice => self.check_amount(record),
            Action::CreatePayment => {
                if let Some(reason) = self.check_amount(record) {
                    return Some(reason);
                }
                let payee = record.get("payee").unwrap_or("").trim();
                if record.flag("new_payee") || !self.is_known_payee(payee) {
                    return Some(ApprovalReason::NewPayee(payee.to_string()));
                }
                None
            }
            _ => None,
        }
    }

    fn check_amount(&self, record: &TaskRecord) -> Option<ApprovalReason> {
        match record.amount("amount") {
            Some(amount) if amount >= self.payment_threshold => {
                Some(ApprovalReason::AmountAtThreshold {
                    amount,
                    threshold: self.payment_threshold,
                })
            }
            Some(_) => None,
            None => Some(ApprovalReason::UnknownAmount),
        }
    }

    fn is_known_payee(&self, payee: &str) -> bool {
        let payee = payee.to_lowercase();
        !payee.is_empty() && self.known_payees.iter().any(|p| *p == payee)
    }
}
