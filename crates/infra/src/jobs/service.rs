//! Client-facing job operations: submit, get, list, cancel, retry, resume,
//! download.
//!
//! Every operation is authorized against the caller's [`Principal`] first.
//! Mutations go through the store's conditional writes; the service never
//! holds a job lock of its own.

use std::sync::Arc;

use tracing::info;

use kitchenline_auth::permissions::{JOBS_MANAGE, JOBS_READ};
use kitchenline_auth::{AuthzError, Principal, authorize};
use kitchenline_core::{JobId, JobKind, JobStatus};
use kitchenline_pipeline::{ArtifactError, ArtifactStore, PipelineRegistry, StoredArtifact};

use super::runs::ActiveRuns;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobFilter, StatusUpdate};

/// A cancel races workers committing their own transitions; give up after
/// this many lost races.
const CANCEL_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum JobServiceError {
    #[error(transparent)]
    Forbidden(#[from] AuthzError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl From<JobStoreError> for JobServiceError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => JobServiceError::NotFound(id),
            JobStoreError::InvalidTransition { .. } => JobServiceError::InvalidTransition(err.to_string()),
            JobStoreError::AlreadyExists(_) => JobServiceError::Conflict(err.to_string()),
            JobStoreError::Storage(msg) => JobServiceError::Storage(msg),
        }
    }
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    registry: PipelineRegistry,
    artifacts: Arc<dyn ArtifactStore>,
    runs: Arc<ActiveRuns>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: PipelineRegistry,
        artifacts: Arc<dyn ArtifactStore>,
        runs: Arc<ActiveRuns>,
    ) -> Self {
        Self {
            store,
            registry,
            artifacts,
            runs,
        }
    }

    /// Job kinds that can currently be submitted.
    pub fn kinds(&self) -> Vec<JobKind> {
        self.registry.kinds()
    }

    fn load(&self, id: JobId) -> Result<Job, JobServiceError> {
        self.store.get(id)?.ok_or(JobServiceError::NotFound(id))
    }

    /// Validate the input against the kind's pipeline and enqueue a job.
    ///
    /// Invalid input is rejected here; no job is created.
    pub fn submit(
        &self,
        principal: &Principal,
        kind: JobKind,
        input: serde_json::Value,
    ) -> Result<Job, JobServiceError> {
        authorize(principal, &JOBS_MANAGE)?;
        let pipeline = self
            .registry
            .get(kind)
            .ok_or_else(|| JobServiceError::Validation(format!("job kind '{kind}' is not enabled")))?;
        let input = pipeline
            .validate_input(&input)
            .map_err(|e| JobServiceError::Validation(e.to_string()))?;

        let job = self.store.create(Job::new(kind, input, principal.principal_id))?;
        info!(job_id = %job.id, kind = %kind, principal = %principal.principal_id, "job submitted");
        Ok(job)
    }

    pub fn get(&self, principal: &Principal, id: JobId) -> Result<Job, JobServiceError> {
        authorize(principal, &JOBS_READ)?;
        self.load(id)
    }

    pub fn list(&self, principal: &Principal, filter: &JobFilter) -> Result<Vec<Job>, JobServiceError> {
        authorize(principal, &JOBS_READ)?;
        Ok(self.store.list(filter)?)
    }

    /// QUEUED, RUNNING or NEEDS_INPUT -> CANCELED.
    ///
    /// The transition is committed immediately; a running worker is signaled
    /// and stops at its next checkpoint. Terminal jobs are rejected unchanged.
    pub fn cancel(&self, principal: &Principal, id: JobId) -> Result<Job, JobServiceError> {
        authorize(principal, &JOBS_MANAGE)?;

        for _ in 0..CANCEL_ATTEMPTS {
            let job = self.load(id)?;
            if !job.status.is_cancelable() {
                return Err(JobServiceError::InvalidTransition(format!(
                    "cannot cancel a {} job",
                    job.status
                )));
            }
            let update = StatusUpdate::to(JobStatus::Canceled).with_log("Canceled by operator");
            if self
                .store
                .compare_and_swap_status(id, job.run_generation, job.status, update)?
            {
                if job.status == JobStatus::Running {
                    self.runs.cancel(id, job.run_generation);
                }
                info!(
                    job_id = %id,
                    run_generation = job.run_generation,
                    from = %job.status,
                    principal = %principal.principal_id,
                    "job canceled"
                );
                return self.load(id);
            }
        }

        Err(JobServiceError::Conflict(format!(
            "job {id} kept changing; cancel not applied"
        )))
    }

    /// FAILED or CANCELED -> QUEUED under a new run generation.
    pub fn retry(&self, principal: &Principal, id: JobId) -> Result<Job, JobServiceError> {
        authorize(principal, &JOBS_MANAGE)?;
        match self.store.begin_retry(id)? {
            Some(job) => {
                info!(
                    job_id = %id,
                    run_generation = job.run_generation,
                    principal = %principal.principal_id,
                    "job retried"
                );
                Ok(job)
            }
            None => {
                let job = self.load(id)?;
                Err(JobServiceError::InvalidTransition(format!(
                    "cannot retry a {} job",
                    job.status
                )))
            }
        }
    }

    /// Record an operator decision for a NEEDS_INPUT job. The dispatcher picks
    /// the job up again and continues at the paused stage.
    pub fn resume(
        &self,
        principal: &Principal,
        id: JobId,
        decision: serde_json::Value,
    ) -> Result<Job, JobServiceError> {
        authorize(principal, &JOBS_MANAGE)?;
        let job = self.load(id)?;
        if job.status != JobStatus::NeedsInput {
            return Err(JobServiceError::InvalidTransition(format!(
                "cannot resume a {} job",
                job.status
            )));
        }
        let pipeline = self.registry.get(job.kind).ok_or_else(|| {
            JobServiceError::Validation(format!("job kind '{}' is not enabled", job.kind))
        })?;
        let decision = pipeline
            .validate_resolution(&decision)
            .map_err(|e| JobServiceError::Validation(e.to_string()))?;

        if !self.store.supply_input(id, job.run_generation, decision)? {
            return Err(JobServiceError::Conflict(format!(
                "job {id} changed while resuming; reload and try again"
            )));
        }
        info!(job_id = %id, principal = %principal.principal_id, "operator input recorded");
        self.load(id)
    }

    /// Fetch the packaged result of a COMPLETED job.
    pub fn download(&self, principal: &Principal, id: JobId) -> Result<StoredArtifact, JobServiceError> {
        authorize(principal, &JOBS_READ)?;
        let job = self.load(id)?;
        match (job.status, job.result_ref.as_deref()) {
            (JobStatus::Completed, Some(key)) => Ok(self.artifacts.get(key)?),
            (status, _) => Err(JobServiceError::Conflict(format!(
                "job {id} has no artifact (status {status})"
            ))),
        }
    }
}
