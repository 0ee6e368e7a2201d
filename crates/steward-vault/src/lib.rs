//! Steward vault: the folder-per-state record store.
//!
//! Records live as `<id>.md` files inside one directory per lifecycle state.
//! This crate owns the record codec, the atomic-rename store, the daily
//! audit log and the execution ledger.

pub mod audit;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod record;
pub mod store;

pub use audit::{AuditLog, AuditLogEntry, AuditResult, AuditSummary};
pub use codec::Document;
pub use error::{CodecError, VaultError};
pub use ledger::{ExecutionLedger, LedgerEntry, LedgerPhase};
pub use record::{Outcome, TaskRecord};
pub use store::VaultStore;
