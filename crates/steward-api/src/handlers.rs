//! HTTP handlers.
//!
//! `/health` always answers 200 while the process is up; the body says
//! whether the zone is actually able to do its work.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::Uri;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use steward_core::types::TaskState;
use steward_vault::VaultError;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub circuit: String,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: String,
    pub zone: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_secs: u64,
    pub vault_ok: bool,
    /// Record count per state folder; empty when the vault is unreachable.
    #[serde(default)]
    pub records: BTreeMap<String, usize>,
    pub services: BTreeMap<String, ServiceHealth>,
}

// =============================================================================
// Handler functions
// =============================================================================

/// Record count per state folder, or `None` as soon as one folder cannot
/// be read.
fn record_counts<F>(count: F) -> Option<BTreeMap<String, usize>>
where
    F: Fn(TaskState) -> Result<usize, VaultError>,
{
    let mut records = BTreeMap::new();
    for task_state in TaskState::ALL {
        match count(task_state) {
            Ok(n) => {
                records.insert(task_state.folder().to_string(), n);
            }
            Err(e) => {
                tracing::warn!(state = %task_state, error = %e, "Cannot count records");
                return None;
            }
        }
    }
    Some(records)
}

/// GET /health - vault reachability and per-service circuit state.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state
        .store
        .health_check()
        .then(|| record_counts(|task_state| state.store.count(task_state)))
        .flatten();
    let vault_ok = counts.is_some();
    let records = counts.unwrap_or_default();

    let services: BTreeMap<String, ServiceHealth> = state
        .monitor
        .snapshot()
        .into_iter()
        .map(|record| {
            (
                record.service_name.clone(),
                ServiceHealth {
                    healthy: record.is_healthy(),
                    circuit: record.circuit.to_string(),
                    consecutive_failures: record.consecutive_failures,
                    last_check: record.last_check,
                    last_error: record.last_error,
                },
            )
        })
        .collect();

    let degraded = !vault_ok || services.values().any(|s| !s.healthy);
    if degraded {
        tracing::debug!(zone = %state.zone_id, vault_ok, "Health check reports degraded");
    }

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        zone: state.zone_id.clone(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        vault_ok,
        records,
        services,
    })
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
