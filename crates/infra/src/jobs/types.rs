//! Job record and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kitchenline_core::{JobId, JobKind, JobStatus, PrincipalId};

/// Metadata key holding the paused stage index and serialized pipeline state.
pub const RESUME_KEY: &str = "resume";
/// Metadata key holding the question shown to an operator.
pub const NEEDS_INPUT_KEY: &str = "needs_input";

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Timestamped job-visible log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Which stage failed, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: String,
    pub cause: String,
}

impl JobFailure {
    pub fn new(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.cause)
    }
}

/// Durable job record.
///
/// Every mutation made on behalf of a run is conditional on `run_generation`;
/// a retry bumps it so writes from an older run are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub logs: Vec<LogEntry>,
    pub result_ref: Option<String>,
    pub error: Option<JobFailure>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// When the current run was admitted (first start or resume).
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_by: PrincipalId,
    pub run_generation: u64,
    /// Operator decision waiting to be applied by the next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<serde_json::Value>,
}

impl Job {
    pub fn new(kind: JobKind, input: serde_json::Value, created_by: PrincipalId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            input,
            status: JobStatus::Queued,
            progress: 0,
            current_step: None,
            logs: vec![LogEntry {
                timestamp: now,
                message: "Job submitted".to_string(),
            }],
            result_ref: None,
            error: None,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            claimed_at: None,
            created_by,
            run_generation: 1,
            pending_input: None,
        }
    }

    /// Apply a status change to this copy of the record, stamping timestamps.
    ///
    /// Does not check preconditions; stores do that before calling.
    pub(crate) fn apply(&mut self, update: StatusUpdate, now: DateTime<Utc>) {
        self.status = update.to;
        self.updated_at = now;
        match update.to {
            JobStatus::Running => {
                self.started_at.get_or_insert(now);
                self.claimed_at = Some(now);
            }
            status if status.is_terminal() => {
                self.finished_at = Some(now);
            }
            _ => {}
        }
        if let Some(r) = update.result_ref {
            self.result_ref = Some(r);
        }
        if let Some(e) = update.error {
            self.error = Some(e);
        }
        for (k, v) in update.metadata {
            self.metadata.insert(k, v);
        }
        if let Some(msg) = update.log {
            self.logs.push(LogEntry {
                timestamp: now,
                message: msg,
            });
        }
        if update.to == JobStatus::Completed {
            self.progress = 100;
        }
    }

    /// Reset for a fresh run: QUEUED with the next generation.
    pub(crate) fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.run_generation += 1;
        self.progress = 0;
        self.current_step = None;
        self.result_ref = None;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
        self.claimed_at = None;
        self.pending_input = None;
        self.metadata.remove(RESUME_KEY);
        self.metadata.remove(NEEDS_INPUT_KEY);
        self.updated_at = now;
        self.logs.push(LogEntry {
            timestamp: now,
            message: format!("Retry requested (run {})", self.run_generation),
        });
    }

    /// NEEDS_INPUT job whose operator decision has been recorded.
    pub fn is_resumable(&self) -> bool {
        self.status == JobStatus::NeedsInput && self.pending_input.is_some()
    }
}

/// A conditional status change plus whatever lands with it atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub to: JobStatus,
    pub result_ref: Option<String>,
    pub error: Option<JobFailure>,
    pub log: Option<String>,
    pub metadata: Vec<(String, serde_json::Value)>,
}

impl StatusUpdate {
    pub fn to(status: JobStatus) -> Self {
        Self {
            to: status,
            result_ref: None,
            error: None,
            log: None,
            metadata: Vec::new(),
        }
    }

    pub fn with_log(mut self, message: impl Into<String>) -> Self {
        self.log = Some(message.into());
        self
    }

    pub fn with_result(mut self, result_ref: impl Into<String>) -> Self {
        self.result_ref = Some(result_ref.into());
        self
    }

    pub fn with_error(mut self, failure: JobFailure) -> Self {
        self.error = Some(failure);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.push((key.into(), value));
        self
    }
}

/// List filter. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: usize,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 200;

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, Self::MAX_LIMIT);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s) && self.kind.is_none_or(|k| job.kind == k)
    }
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            kind: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_is_queued_with_submission_log() {
        let job = Job::new(JobKind::MenuImport, json!({"restaurant_name": "GF"}), PrincipalId::new());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.run_generation, 1);
        assert_eq!(job.progress, 0);
        assert_eq!(job.logs.len(), 1);
        assert_eq!(job.logs[0].message, "Job submitted");
    }

    #[test]
    fn apply_stamps_times_and_sets_result() {
        let mut job = Job::new(JobKind::MenuImport, json!({}), PrincipalId::new());
        let t0 = Utc::now();
        job.apply(StatusUpdate::to(JobStatus::Running), t0);
        assert_eq!(job.started_at, Some(t0));

        job.apply(
            StatusUpdate::to(JobStatus::Completed)
                .with_result("menu-importer/x/gf.zip")
                .with_log("Job completed"),
            t0,
        );
        assert_eq!(job.finished_at, Some(t0));
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_ref.as_deref(), Some("menu-importer/x/gf.zip"));
        assert_eq!(job.logs.last().map(|l| l.message.as_str()), Some("Job completed"));
    }

    #[test]
    fn retry_reset_bumps_generation_and_clears_run_fields() {
        let mut job = Job::new(JobKind::ArGenerate, json!({}), PrincipalId::new());
        let now = Utc::now();
        job.apply(StatusUpdate::to(JobStatus::Running), now);
        job.progress = 40;
        job.metadata.insert(RESUME_KEY.into(), json!({"stage_index": 0}));
        job.metadata.insert("items_count".into(), json!(3));
        job.apply(
            StatusUpdate::to(JobStatus::Failed).with_error(JobFailure::new("Extraction", "boom")),
            now,
        );

        job.reset_for_retry(now);

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.run_generation, 2);
        assert_eq!(job.progress, 0);
        assert!(job.error.is_none());
        assert!(job.started_at.is_none() && job.finished_at.is_none());
        assert!(!job.metadata.contains_key(RESUME_KEY));
        assert_eq!(job.metadata["items_count"], json!(3));
    }

    #[test]
    fn filter_limit_is_clamped() {
        assert_eq!(JobFilter::default().with_limit(0).limit, 1);
        assert_eq!(JobFilter::default().with_limit(10_000).limit, JobFilter::MAX_LIMIT);
    }
}
