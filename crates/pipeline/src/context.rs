//! What a running stage sees of the outside world.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use kitchenline_core::JobId;

use crate::cancel::CancellationToken;
use crate::error::StageError;

/// Narrow write API into the job record for one run.
///
/// Every method returns `false` only when the store definitively rejected the
/// write (stale `run_generation`, or the job is no longer RUNNING). A run whose
/// writes are rejected has been superseded and should stop.
pub trait ProgressSink: Send + Sync {
    fn set_progress(&self, percent: u8, step: &str) -> bool;
    fn append_log(&self, message: &str) -> bool;
    fn merge_metadata(&self, key: &str, value: serde_json::Value) -> bool;
}

/// Granularity of cancellation checks while sleeping.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Per-stage view of a run.
///
/// Maps stage-local progress (0-100) into the job's global scale using the
/// stage's weight and cumulative offset, and never reports below the floor
/// already reached by the run.
pub struct StageContext<'a> {
    job_id: JobId,
    run_generation: u64,
    stage: &'static str,
    offset: u8,
    weight: u8,
    sink: &'a dyn ProgressSink,
    token: &'a CancellationToken,
    floor: &'a AtomicU8,
    superseded: &'a AtomicBool,
}

impl<'a> StageContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job_id: JobId,
        run_generation: u64,
        stage: &'static str,
        offset: u8,
        weight: u8,
        sink: &'a dyn ProgressSink,
        token: &'a CancellationToken,
        floor: &'a AtomicU8,
        superseded: &'a AtomicBool,
    ) -> Self {
        Self {
            job_id,
            run_generation,
            stage,
            offset,
            weight,
            sink,
            token,
            floor,
            superseded,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn run_generation(&self) -> u64 {
        self.run_generation
    }

    pub fn stage_name(&self) -> &'static str {
        self.stage
    }

    /// Global progress for a within-stage percentage.
    pub fn global_percent(&self, within_stage: u8) -> u8 {
        map_progress(self.offset, self.weight, within_stage)
    }

    /// Report progress within this stage (0-100).
    ///
    /// Values that would not raise the job's progress are dropped locally.
    pub fn report_progress(&self, within_stage: u8) {
        let global = self.global_percent(within_stage);
        let prev = self.floor.fetch_max(global, Ordering::SeqCst);
        if global <= prev {
            return;
        }
        if !self.sink.set_progress(global, self.stage) {
            self.mark_superseded();
        }
    }

    /// Append a timestamped line to the job's log.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(
            job_id = %self.job_id,
            run_generation = self.run_generation,
            stage = self.stage,
            "{message}"
        );
        if !self.sink.append_log(message) {
            self.mark_superseded();
        }
    }

    /// Record an informational fact about the run under `metadata[key]`.
    pub fn record_metadata(&self, key: &str, value: serde_json::Value) {
        if !self.sink.merge_metadata(key, value) {
            self.mark_superseded();
        }
    }

    /// True once the run was canceled or its writes started being rejected.
    pub fn is_canceled(&self) -> bool {
        self.token.is_canceled() || self.superseded.load(Ordering::SeqCst)
    }

    /// Cancellation checkpoint: `Err(StageError::Canceled)` if the run should stop.
    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.is_canceled() {
            Err(StageError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if the run is canceled.
    pub fn sleep(&self, duration: Duration) -> Result<(), StageError> {
        sleep_observing(duration, || self.is_canceled())
    }

    fn mark_superseded(&self) {
        if !self.superseded.swap(true, Ordering::SeqCst) {
            tracing::info!(
                job_id = %self.job_id,
                run_generation = self.run_generation,
                stage = self.stage,
                "write rejected by store; run superseded"
            );
        }
    }
}

/// offset + weight * pct / 100, with pct clamped to 100.
pub(crate) fn map_progress(offset: u8, weight: u8, within_stage: u8) -> u8 {
    let pct = u32::from(within_stage.min(100));
    let global = u32::from(offset) + u32::from(weight) * pct / 100;
    global.min(100) as u8
}

pub(crate) fn sleep_observing(
    duration: Duration,
    is_canceled: impl Fn() -> bool,
) -> Result<(), StageError> {
    let deadline = Instant::now() + duration;
    loop {
        if is_canceled() {
            return Err(StageError::Canceled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
