//! Watchers for Steward.
//!
//! Producers of new work: the event-driven inbox drop watcher and polled
//! external sources. Both only ever create records in `Needs_Action` (or
//! claim them there from `Inbox`); what happens next is the orchestrator's
//! business.

pub mod error;
pub mod inbox;
pub mod priority;
pub mod source;

pub use error::WatchError;
pub use inbox::{InboxEvents, InboxReport, InboxWatcher};
pub use priority::{classify_email_priority, classify_file_priority};
pub use source::{PolledSource, SourceItem, SourceReport, SourceWatcher, SpoolSource};
