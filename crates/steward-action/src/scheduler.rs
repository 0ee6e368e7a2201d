//! Cooperative job scheduler.
//!
//! Fires named jobs at fixed intervals from a single tick loop. Each job has
//! a `running` guard: a job that is due while its previous run is still
//! active is skipped, never overlapped. Jobs hold no business logic of their
//! own; they call orchestrator and watcher entry points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info};

use steward_core::config::SchedulerConfig;

use crate::error::SchedulerError;

/// How long shutdown waits for in-flight jobs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), SchedulerError>;
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

/// Single-process timer loop over a fixed set of jobs.
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    tick: Duration,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            tick: tick.max(Duration::from_millis(10)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(Duration::from_millis(config.tick_ms))
    }

    /// Register a job. A zero interval is treated as one tick.
    pub fn add_job(&mut self, job: Arc<dyn Job>, interval: Duration) {
        debug!(job = job.name(), interval_secs = interval.as_secs(), "Job registered");
        self.jobs.push(ScheduledJob {
            job,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        });
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.job.name()).collect()
    }

    /// Handle that stops `run` from another task or a signal handler.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the scheduler to shut down gracefully.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run one job by name to completion, honouring its running guard.
    pub async fn run_job(&self, name: &str) -> Result<(), SchedulerError> {
        let scheduled = self
            .jobs
            .iter()
            .find(|j| j.job.name() == name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        if scheduled.running.swap(true, Ordering::SeqCst) {
            info!(job = name, "Skipping run: previous run still active");
            return Ok(());
        }
        let result = scheduled.job.run().await;
        scheduled.running.store(false, Ordering::SeqCst);
        result
    }

    /// Start the tick loop. Every job runs once immediately, then at its
    /// interval. Returns on shutdown after in-flight jobs finish or the
    /// drain timeout passes.
    pub async fn run(&self) {
        info!(jobs = self.jobs.len(), tick_ms = self.tick.as_millis() as u64, "Scheduler started");
        let start = Instant::now();
        let mut due: Vec<Instant> = vec![start; self.jobs.len()];

        loop {
            let now = Instant::now();
            for (scheduled, next) in self.jobs.iter().zip(due.iter_mut()) {
                if now < *next {
                    continue;
                }
                *next = now + scheduled.interval.max(self.tick);
                dispatch(scheduled);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        info!("Scheduler shutting down");
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.jobs.iter().any(|j| j.running.load(Ordering::SeqCst)) {
            if Instant::now() >= deadline {
                error!("Jobs still running after drain timeout");
                break;
            }
            tokio::time::sleep(self.tick).await;
        }
    }
}

/// Spawn a due job unless its previous run is still active.
fn dispatch(scheduled: &ScheduledJob) {
    let name = scheduled.job.name().to_string();
    if scheduled.running.swap(true, Ordering::SeqCst) {
        info!(job = %name, "Skipping run: previous run still active");
        return;
    }
    let job = Arc::clone(&scheduled.job);
    let running = Arc::clone(&scheduled.running);
    tokio::spawn(async move {
        let started = Instant::now();
        match job.run().await {
            Ok(()) => debug!(
                job = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job finished"
            ),
            Err(e) => error!(job = %name, error = %e, "Job failed"),
        }
        running.store(false, Ordering::SeqCst);
    });
}
