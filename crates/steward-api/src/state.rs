//! Application state shared across route handlers.

use std::sync::Arc;
use std::time::Instant;

use steward_action::RetryHealthMonitor;
use steward_vault::VaultStore;

/// Shared application state. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub store: VaultStore,
    pub zone_id: String,
    /// The same monitor the watchers and executors report into.
    pub monitor: Arc<RetryHealthMonitor>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: VaultStore, zone_id: impl Into<String>, monitor: Arc<RetryHealthMonitor>) -> Self {
        Self {
            store,
            zone_id: zone_id.into(),
            monitor,
            start_time: Instant::now(),
        }
    }
}
