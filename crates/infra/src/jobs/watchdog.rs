//! Deadline watchdog.
//!
//! Cancels runs that exceeded their time budget and fails paused jobs nobody
//! answered. Runs on its own thread; every action is a conditional write, so
//! racing a worker or an operator is harmless.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use kitchenline_core::JobStatus;

use super::runs::ActiveRuns;
use super::store::{JobStore, JobStoreError};
use super::types::{JobFailure, NEEDS_INPUT_KEY, StatusUpdate};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Longest a single run may stay RUNNING.
    pub max_run_time: Duration,
    /// Longest a job may wait in NEEDS_INPUT.
    pub needs_input_ttl: Duration,
    pub name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_run_time: Duration::from_secs(30 * 60),
            needs_input_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            name: "watchdog".to_string(),
        }
    }
}

impl WatchdogConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_run_time(mut self, max: Duration) -> Self {
        self.max_run_time = max;
        self
    }

    pub fn with_needs_input_ttl(mut self, ttl: Duration) -> Self {
        self.needs_input_ttl = ttl;
        self
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub canceled: usize,
    pub expired: usize,
}

fn older_than(at: Option<DateTime<Utc>>, limit: Duration, now: DateTime<Utc>) -> bool {
    let Some(at) = at else {
        return false;
    };
    match chrono::Duration::from_std(limit) {
        Ok(limit) => now - at > limit,
        Err(_) => false,
    }
}

pub struct Watchdog {
    store: Arc<dyn JobStore>,
    runs: Arc<ActiveRuns>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(store: Arc<dyn JobStore>, runs: Arc<ActiveRuns>, config: WatchdogConfig) -> Self {
        Self { store, runs, config }
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, JobStoreError> {
        let mut report = SweepReport::default();

        for job in self.store.in_status(JobStatus::Running)? {
            if !older_than(job.claimed_at.or(job.started_at), self.config.max_run_time, now) {
                continue;
            }
            let update = StatusUpdate::to(JobStatus::Canceled)
                .with_log("canceled by watchdog: deadline exceeded");
            if self
                .store
                .compare_and_swap_status(job.id, job.run_generation, JobStatus::Running, update)?
            {
                self.runs.cancel(job.id, job.run_generation);
                warn!(job_id = %job.id, run_generation = job.run_generation, "run exceeded deadline; canceled");
                report.canceled += 1;
            }
        }

        for job in self.store.in_status(JobStatus::NeedsInput)? {
            if !older_than(Some(job.updated_at), self.config.needs_input_ttl, now) {
                continue;
            }
            let stage = job
                .metadata
                .get(NEEDS_INPUT_KEY)
                .and_then(|q| q.get("stage"))
                .and_then(|s| s.as_str())
                .unwrap_or("Watchdog")
                .to_string();
            let update = StatusUpdate::to(JobStatus::Failed)
                .with_error(JobFailure::new(stage, "no input received before the deadline"))
                .with_log("Input deadline passed");
            if self
                .store
                .compare_and_swap_status(job.id, job.run_generation, JobStatus::NeedsInput, update)?
            {
                warn!(job_id = %job.id, "paused job expired");
                report.expired += 1;
            }
        }

        Ok(report)
    }

    pub fn spawn(self) -> std::io::Result<WatchdogHandle> {
        let (tx, rx) = mpsc::channel::<()>();
        let name = self.config.name.clone();
        let join = thread::Builder::new().name(name).spawn(move || self.run(rx))?;
        Ok(WatchdogHandle {
            shutdown: tx,
            join: Some(join),
        })
    }

    fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        info!(
            watchdog = %self.config.name,
            interval_secs = self.config.interval.as_secs(),
            max_run_secs = self.config.max_run_time.as_secs(),
            "watchdog started"
        );
        loop {
            match self.sweep(Utc::now()) {
                Ok(SweepReport { canceled: 0, expired: 0 }) => {}
                Ok(report) => info!(canceled = report.canceled, expired = report.expired, "watchdog sweep"),
                Err(e) => error!(error = %e, "watchdog sweep failed"),
            }
            match shutdown_rx.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(watchdog = %self.config.name, "watchdog stopped");
    }
}

#[derive(Debug)]
pub struct WatchdogHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
