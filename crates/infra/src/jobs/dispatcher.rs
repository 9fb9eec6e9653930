//! Dispatcher / worker pool.
//!
//! Each worker thread loops: claim the oldest runnable job, execute its
//! pipeline, commit the outcome with a conditional status write. Claims happen
//! under the [`ActiveRuns`] lock, so a job id that still has a live worker is
//! never handed to a second one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};

use kitchenline_core::{JobId, JobKind, JobStatus};
use kitchenline_pipeline::{CancellationToken, PipelineOutcome, PipelineRegistry, ResumePoint, RunRequest};

use super::reporter::StoreReporter;
use super::runs::ActiveRuns;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobFailure, NEEDS_INPUT_KEY, RESUME_KEY, StatusUpdate};

const DISPATCHER_STAGE: &str = "Dispatcher";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Size of the worker pool.
    pub workers: usize,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
    /// Thread name prefix, also used in logs.
    pub name: String,
    /// Job kinds this dispatcher accepts.
    pub kinds: Vec<JobKind>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(250),
            name: "dispatcher".to_string(),
            kinds: JobKind::ALL.to_vec(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = JobKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DispatcherStats {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_canceled: u64,
    pub jobs_paused: u64,
    /// Outcomes whose commit was rejected because the run had been superseded.
    pub outcomes_discarded: u64,
    pub orphans_recovered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// How one claimed run ended, from the dispatcher's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Failed,
    Canceled,
    Paused,
    /// The outcome was not committed: the job had already moved on.
    Discarded,
}

fn lock_stats(stats: &Mutex<DispatcherStats>) -> MutexGuard<'_, DispatcherStats> {
    stats.lock().unwrap_or_else(|p| p.into_inner())
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct DispatcherHandle {
    workers: Vec<(mpsc::Sender<()>, thread::JoinHandle<()>)>,
    stats: Arc<Mutex<DispatcherStats>>,
    started: Instant,
}

impl DispatcherHandle {
    /// Stop claiming, let in-flight runs finish, and join every worker.
    pub fn shutdown(self) {
        for (tx, _) in &self.workers {
            let _ = tx.send(());
        }
        for (_, join) in self.workers {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let mut s = lock_stats(&self.stats).clone();
        s.uptime_secs = self.started.elapsed().as_secs();
        s
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Releases a job id from [`ActiveRuns`] when the worker is done with it,
/// however it got there.
struct RunSlot<'a> {
    runs: &'a ActiveRuns,
    id: JobId,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.runs.finish(self.id);
    }
}

/// Claims jobs and drives their pipelines.
#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    registry: PipelineRegistry,
    runs: Arc<ActiveRuns>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn JobStore>, registry: PipelineRegistry, runs: Arc<ActiveRuns>) -> Self {
        Self {
            store,
            registry,
            runs,
        }
    }

    /// Fail RUNNING jobs that no worker in this process owns.
    ///
    /// Meant for startup, when such jobs were left behind by a previous
    /// process.
    pub fn recover_orphans(&self) -> Result<usize, JobStoreError> {
        let mut recovered = 0;
        for job in self.store.in_status(JobStatus::Running)? {
            if self.runs.is_active(job.id) {
                continue;
            }
            let update = StatusUpdate::to(JobStatus::Failed)
                .with_error(JobFailure::new(DISPATCHER_STAGE, "interrupted by dispatcher restart"))
                .with_log("Interrupted by dispatcher restart");
            if self
                .store
                .compare_and_swap_status(job.id, job.run_generation, JobStatus::Running, update)?
            {
                warn!(job_id = %job.id, run_generation = job.run_generation, "orphaned run marked failed");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    fn claim(&self, kinds: &[JobKind]) -> Result<Option<(Job, CancellationToken)>, JobStoreError> {
        let mut runs = self.runs.lock();
        let busy = runs.busy_ids();
        let Some(job) = self.store.claim_next(kinds, &busy)? else {
            return Ok(None);
        };
        let token = runs.register(job.id, job.run_generation);
        Ok(Some((job, token)))
    }

    /// Claim and execute at most one job on the calling thread.
    pub fn run_once(&self, worker: &str, kinds: &[JobKind]) -> Result<Option<RunEnd>, JobStoreError> {
        match self.claim(kinds)? {
            Some((job, token)) => self.execute(worker, job, token).map(Some),
            None => Ok(None),
        }
    }

    fn execute(&self, worker: &str, job: Job, token: CancellationToken) -> Result<RunEnd, JobStoreError> {
        let _slot = RunSlot {
            runs: &self.runs,
            id: job.id,
        };
        info!(
            worker,
            job_id = %job.id,
            kind = %job.kind,
            run_generation = job.run_generation,
            resumed = job.pending_input.is_some(),
            "job claimed"
        );

        let Some(pipeline) = self.registry.get(job.kind) else {
            return self.commit(
                &job,
                PipelineOutcome::Failed {
                    stage: DISPATCHER_STAGE.to_string(),
                    cause: format!("no pipeline registered for kind '{}'", job.kind),
                },
            );
        };

        let resume = match resume_point(&job) {
            Ok(resume) => resume,
            Err(cause) => {
                return self.commit(
                    &job,
                    PipelineOutcome::Failed {
                        stage: DISPATCHER_STAGE.to_string(),
                        cause,
                    },
                );
            }
        };

        let reporter = StoreReporter::new(self.store.clone(), job.id, job.run_generation);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            pipeline.execute(RunRequest {
                job_id: job.id,
                run_generation: job.run_generation,
                input: &job.input,
                resume,
                sink: &reporter,
                token: &token,
            })
        }))
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(worker, job_id = %job.id, panic = %message, "pipeline panicked");
            let stage = self
                .store
                .get(job.id)
                .ok()
                .flatten()
                .and_then(|j| j.current_step)
                .unwrap_or_else(|| DISPATCHER_STAGE.to_string());
            PipelineOutcome::Failed {
                stage,
                cause: format!("stage panicked: {message}"),
            }
        });

        self.commit(&job, outcome)
    }

    /// Turn a pipeline outcome into a conditional status transition.
    fn commit(&self, job: &Job, outcome: PipelineOutcome) -> Result<RunEnd, JobStoreError> {
        let (end, update) = match outcome {
            PipelineOutcome::Completed { result_ref } => (
                RunEnd::Completed,
                StatusUpdate::to(JobStatus::Completed)
                    .with_result(result_ref)
                    .with_log("Job completed"),
            ),
            PipelineOutcome::Failed { stage, cause } => (
                RunEnd::Failed,
                StatusUpdate::to(JobStatus::Failed)
                    .with_log(format!("Failed at {stage}: {cause}"))
                    .with_error(JobFailure::new(stage, cause)),
            ),
            PipelineOutcome::Canceled { stage } => (
                RunEnd::Canceled,
                StatusUpdate::to(JobStatus::Canceled).with_log(format!("Canceled during {stage}")),
            ),
            PipelineOutcome::NeedsInput {
                stage_index,
                stage,
                reason,
                candidates,
                state,
            } => (
                RunEnd::Paused,
                StatusUpdate::to(JobStatus::NeedsInput)
                    .with_log(format!("Waiting for input at {stage}: {reason}"))
                    .with_metadata(RESUME_KEY, json!({"stage_index": stage_index, "state": state}))
                    .with_metadata(
                        NEEDS_INPUT_KEY,
                        json!({"stage": stage, "reason": reason, "candidates": candidates}),
                    ),
            ),
        };
        let to = update.to;

        if self
            .store
            .compare_and_swap_status(job.id, job.run_generation, JobStatus::Running, update)?
        {
            info!(job_id = %job.id, run_generation = job.run_generation, status = %to, "run finished");
            Ok(end)
        } else {
            // Already canceled, retried or recovered by someone else.
            debug!(
                job_id = %job.id,
                run_generation = job.run_generation,
                status = %to,
                "outcome discarded; run superseded"
            );
            Ok(RunEnd::Discarded)
        }
    }

    /// Recover orphans, then start `config.workers` named worker threads.
    pub fn spawn(self, config: DispatcherConfig) -> std::io::Result<DispatcherHandle> {
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));

        match self.recover_orphans() {
            Ok(0) => {}
            Ok(n) => {
                warn!(dispatcher = %config.name, recovered = n, "recovered orphaned runs");
                lock_stats(&stats).orphans_recovered = n as u64;
            }
            Err(e) => error!(dispatcher = %config.name, error = %e, "orphan recovery failed"),
        }

        let mut handle = DispatcherHandle {
            workers: Vec::with_capacity(config.workers),
            stats: stats.clone(),
            started: Instant::now(),
        };

        for i in 0..config.workers.max(1) {
            let (tx, rx) = mpsc::channel::<()>();
            let worker_name = format!("{}-{i}", config.name);
            let dispatcher = self.clone();
            let kinds = config.kinds.clone();
            let poll = config.poll_interval;
            let stats = stats.clone();
            let spawned = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(dispatcher, worker_name, kinds, poll, rx, stats));
            match spawned {
                Ok(join) => handle.workers.push((tx, join)),
                Err(e) => {
                    handle.shutdown();
                    return Err(e);
                }
            }
        }

        info!(
            dispatcher = %config.name,
            workers = handle.workers.len(),
            kinds = ?config.kinds,
            "dispatcher started"
        );
        Ok(handle)
    }
}

/// Rebuild where a paused run left off from the claimed record.
fn resume_point(job: &Job) -> Result<Option<ResumePoint>, String> {
    let Some(decision) = job.pending_input.clone() else {
        return Ok(None);
    };
    let saved = job
        .metadata
        .get(RESUME_KEY)
        .ok_or_else(|| "resume state missing".to_string())?;
    let stage_index = saved
        .get("stage_index")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "resume state has no stage index".to_string())? as usize;
    let state = saved
        .get("state")
        .cloned()
        .ok_or_else(|| "resume state has no pipeline state".to_string())?;
    Ok(Some(ResumePoint {
        stage_index,
        state,
        decision,
        floor: job.progress,
    }))
}

fn worker_loop(
    dispatcher: JobDispatcher,
    worker: String,
    kinds: Vec<JobKind>,
    poll_interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<DispatcherStats>>,
) {
    info!(worker = %worker, "worker started");

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        match dispatcher.claim(&kinds) {
            Ok(Some((job, token))) => {
                {
                    let mut s = lock_stats(&stats);
                    s.jobs_claimed += 1;
                    s.current_running += 1;
                }
                let job_id = job.id;
                let end = dispatcher.execute(&worker, job, token);
                let mut s = lock_stats(&stats);
                s.current_running = s.current_running.saturating_sub(1);
                match end {
                    Ok(RunEnd::Completed) => s.jobs_completed += 1,
                    Ok(RunEnd::Failed) => s.jobs_failed += 1,
                    Ok(RunEnd::Canceled) => s.jobs_canceled += 1,
                    Ok(RunEnd::Paused) => s.jobs_paused += 1,
                    Ok(RunEnd::Discarded) => s.outcomes_discarded += 1,
                    Err(e) => {
                        error!(worker = %worker, job_id = %job_id, error = %e, "failed to commit run outcome");
                    }
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(worker = %worker, error = %e, "failed to claim job"),
        }

        match shutdown_rx.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = %worker, "worker stopped");
}
