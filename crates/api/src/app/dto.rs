use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kitchenline_core::{JobId, JobKind, JobStatus};
use kitchenline_infra::jobs::{Job, JobFailure, JobFilter, LogEntry, Metadata};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub kind: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub fn to_filter(&self) -> Result<JobFilter, axum::response::Response> {
        let mut filter = JobFilter::default();
        if let Some(raw) = self.status.as_deref() {
            filter = filter.with_status(parse_status(raw)?);
        }
        if let Some(raw) = self.kind.as_deref() {
            filter = filter.with_kind(parse_kind(raw)?);
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        Ok(filter)
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub input: serde_json::Value,
    pub logs: Vec<LogEntry>,
    pub result_ref: Option<String>,
    pub error: Option<JobFailure>,
    pub metadata: Metadata,
    pub run_generation: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step,
            input: job.input,
            logs: job.logs,
            result_ref: job.result_ref,
            error: job.error,
            metadata: job.metadata,
            run_generation: job.run_generation,
            created_by: job.created_by.to_string(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// List entry without logs or input.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            current_step: job.current_step,
            result_ref: job.result_ref,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// -------------------------
// Path/query parsing
// -------------------------

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("'{raw}' is not a job id"))
    })
}

pub fn parse_kind(raw: &str) -> Result<JobKind, axum::response::Response> {
    raw.parse::<JobKind>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("unknown job kind '{raw}' (expected menu-import or ar-generate)"),
        )
    })
}

pub fn parse_status(raw: &str) -> Result<JobStatus, axum::response::Response> {
    raw.parse::<JobStatus>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("unknown job status '{raw}'"),
        )
    })
}
