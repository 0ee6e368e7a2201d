//! Steward API crate - the axum health endpoint.
//!
//! Exposes vault reachability and the circuit state of every external
//! service the zone talks to, for container orchestrators and operators.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
