//! Shared foundation for the steward workspace.
//!
//! Configuration, the top-level error type, and the domain enums every
//! other crate speaks: lifecycle states, priorities, record kinds, actions
//! and zone capabilities.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use config::StewardConfig;
pub use error::{Result, StewardError};
pub use lifecycle::validate_transition;
pub use types::*;
