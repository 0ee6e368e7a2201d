//! Vault replication between zones for Steward.
//!
//! The vault is a git working tree shared through one remote branch. Zones
//! commit and push on an interval; conflicting moves of the same record are
//! detected from location indices and re-filed under `Conflicts/`.

pub mod bridge;
pub mod error;
pub mod git;
pub mod index;

pub use bridge::{SyncBridge, SyncConflict, SyncReport};
pub use error::SyncError;
pub use git::{git_available, Git};
pub use index::{detect_divergent, DivergentMove, LocationIndex};
