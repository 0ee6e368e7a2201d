//! Retry and health monitoring for external collaborators.
//!
//! Every call to a reasoning command, executor or polled source goes through
//! [`RetryHealthMonitor`]. Transient failures back off exponentially with
//! jitter; after `failure_threshold` consecutive failures the service's
//! circuit opens and calls fail fast until a single probe is admitted after
//! `probe_interval`. One success closes the circuit and resets the count.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use steward_core::config::RetryConfig;

use crate::error::Retryable;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Health of one external service. Owned by the monitor; callers only get
/// copies through [`RetryHealthMonitor::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub service_name: String,
    pub consecutive_failures: u32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub circuit: CircuitState,
}

impl HealthRecord {
    fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            consecutive_failures: 0,
            backoff_until: None,
            last_success_at: None,
            last_check: None,
            last_error: None,
            circuit: CircuitState::Closed,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.circuit == CircuitState::Closed
    }
}

struct ServiceState {
    record: HealthRecord,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff with bounded proportional jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// In `[0, 1)`. Keeps the jittered sequence non-decreasing.
    pub jitter_fraction: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            max: Duration::from_millis(config.max_delay_ms),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 0.999),
        }
    }

    /// Un-jittered delay for the n-th consecutive failure (1-based).
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Delay for the n-th failure with `sample` in `[0, 1)` scaling the jitter.
    pub fn delay(&self, failures: u32, sample: f64) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let raw = self.base.saturating_mul(1u32 << exponent);
        let jitter = raw.mul_f64(self.jitter_fraction * sample.clamp(0.0, 1.0));
        raw.saturating_add(jitter).min(self.max)
    }

    pub fn jittered_delay(&self, failures: u32) -> Duration {
        let sample: f64 = rand::rng().random_range(0.0..1.0);
        self.delay(failures, sample)
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct RetryHealthMonitor {
    policy: BackoffPolicy,
    failure_threshold: u32,
    probe_interval: Duration,
    max_attempts: u32,
    services: Mutex<HashMap<String, ServiceState>>,
}

impl RetryHealthMonitor {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            policy: BackoffPolicy::from_config(config),
            failure_threshold: config.failure_threshold.max(1),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
            max_attempts: config.max_attempts_per_call.max(1),
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Make a service visible in snapshots before its first call.
    pub fn register(&self, service: &str) {
        let mut services = self.lock();
        services
            .entry(service.to_string())
            .or_insert_with(|| ServiceState {
                record: HealthRecord::new(service),
                opened_at: None,
                probe_in_flight: false,
            });
    }

    /// Make a single attempt through the circuit.
    pub async fn call<T, E, F, Fut>(&self, service: &str, f: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.attempt(service, f).await.0
    }

    /// Call with up to `max_attempts_per_call` attempts, sleeping the backoff
    /// delay between transient failures.
    pub async fn call_with_retry<T, E, F, Fut>(&self, service: &str, mut f: F) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let (result, delay) = self.attempt(service, &mut f).await;
            match (result, delay) {
                (Err(e), Some(delay)) if attempt < self.max_attempts => {
                    debug!(
                        service = %service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                (result, _) => return result,
            }
        }
    }

    /// Copies of every service record, sorted by name.
    pub fn snapshot(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self
            .lock()
            .values()
            .map(|s| {
                let mut record = s.record.clone();
                if record.circuit == CircuitState::Open && self.probe_due(s) {
                    record.circuit = CircuitState::HalfOpen;
                }
                record
            })
            .collect();
        records.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        records
    }

    pub fn get(&self, service: &str) -> Option<HealthRecord> {
        self.lock().get(service).map(|s| s.record.clone())
    }

    /// Returns the error and, for transient failures, the backoff delay.
    async fn attempt<T, E, F, Fut>(&self, service: &str, f: F) -> (Result<T, E>, Option<Duration>)
    where
        E: Retryable + fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit(service) {
            debug!(service = %service, "Circuit open, failing fast");
            return (Err(E::degraded(service)), None);
        }
        match f().await {
            Ok(value) => {
                self.record_success(service);
                (Ok(value), None)
            }
            Err(e) if e.is_transient() => {
                let delay = self.record_failure(service, &e.to_string());
                (Err(e), Some(delay))
            }
            Err(e) => {
                self.release_probe(service);
                (Err(e), None)
            }
        }
    }

    fn admit(&self, service: &str) -> bool {
        let mut services = self.lock();
        let state = services
            .entry(service.to_string())
            .or_insert_with(|| ServiceState {
                record: HealthRecord::new(service),
                opened_at: None,
                probe_in_flight: false,
            });
        match state.record.circuit {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.probe_due(state) && !state.probe_in_flight {
                    state.record.circuit = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    info!(service = %service, "Circuit half-open, admitting probe call");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    false
                } else {
                    state.probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn probe_due(&self, state: &ServiceState) -> bool {
        let Some(opened_at) = state.opened_at else {
            return true;
        };
        let elapsed = (Utc::now() - opened_at).to_std().unwrap_or(Duration::ZERO);
        elapsed >= self.probe_interval
    }

    fn record_success(&self, service: &str) {
        let mut services = self.lock();
        if let Some(state) = services.get_mut(service) {
            let now = Utc::now();
            if state.record.circuit != CircuitState::Closed {
                info!(service = %service, "Service recovered, circuit closed");
            }
            state.record.consecutive_failures = 0;
            state.record.circuit = CircuitState::Closed;
            state.record.backoff_until = None;
            state.record.last_success_at = Some(now);
            state.record.last_check = Some(now);
            state.record.last_error = None;
            state.opened_at = None;
            state.probe_in_flight = false;
        }
    }

    fn record_failure(&self, service: &str, error: &str) -> Duration {
        let mut services = self.lock();
        let Some(state) = services.get_mut(service) else {
            return self.policy.base;
        };
        let now = Utc::now();
        state.record.consecutive_failures = state.record.consecutive_failures.saturating_add(1);
        let failures = state.record.consecutive_failures;
        let delay = self.policy.jittered_delay(failures);
        state.record.last_check = Some(now);
        state.record.last_error = Some(error.to_string());
        state.record.backoff_until = chrono::Duration::from_std(delay).ok().map(|d| now + d);
        state.probe_in_flight = false;

        let reopen = state.record.circuit == CircuitState::HalfOpen;
        if reopen || (state.record.circuit == CircuitState::Closed && failures >= self.failure_threshold)
        {
            state.record.circuit = CircuitState::Open;
            state.opened_at = Some(now);
            warn!(
                service = %service,
                consecutive_failures = failures,
                error = %error,
                "Circuit opened"
            );
        } else {
            warn!(
                service = %service,
                consecutive_failures = failures,
                error = %error,
                "External call failed"
            );
        }
        delay
    }

    fn release_probe(&self, service: &str) {
        if let Some(state) = self.lock().get_mut(service) {
            state.probe_in_flight = false;
            state.record.last_check = Some(Utc::now());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ServiceState>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
