//! Job record storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use kitchenline_core::{DomainError, JobId, JobKind, JobStatus};

use super::types::{Job, JobFilter, LogEntry, StatusUpdate};

/// Durable job record store.
///
/// Writes made on behalf of a run are conditional: they carry the run's
/// `run_generation` and are applied only while the record still has that
/// generation and is RUNNING. `Ok(false)` means the precondition did not hold
/// and nothing changed; it is not an error.
pub trait JobStore: Send + Sync {
    fn create(&self, job: Job) -> Result<Job, JobStoreError>;

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Newest first, at most `filter.limit` records.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Every job currently in `status`, oldest first.
    fn in_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError>;

    /// Apply `update` only if the record is at `generation` and in `expected`.
    ///
    /// `expected -> update.to` must be a legal transition.
    fn compare_and_swap_status(
        &self,
        id: JobId,
        generation: u64,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobStoreError>;

    fn append_log(&self, id: JobId, generation: u64, message: &str) -> Result<bool, JobStoreError>;

    /// Never lowers progress; a lower value is accepted but ignored.
    fn set_progress(
        &self,
        id: JobId,
        generation: u64,
        percent: u8,
        step: &str,
    ) -> Result<bool, JobStoreError>;

    fn merge_metadata(
        &self,
        id: JobId,
        generation: u64,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, JobStoreError>;

    /// Atomically move the oldest runnable job of an accepted kind to RUNNING.
    ///
    /// Runnable means QUEUED, or NEEDS_INPUT with a recorded decision. Jobs in
    /// `skip` are passed over. The returned record carries the decision in
    /// `pending_input`; the stored one no longer does.
    fn claim_next(&self, kinds: &[JobKind], skip: &HashSet<JobId>) -> Result<Option<Job>, JobStoreError>;

    /// FAILED/CANCELED -> QUEUED with the next generation.
    ///
    /// `Ok(None)` when the job is in any other status.
    fn begin_retry(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Record an operator decision on a NEEDS_INPUT job at `generation`.
    fn supply_input(
        &self,
        id: JobId,
        generation: u64,
        decision: serde_json::Value,
    ) -> Result<bool, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("illegal transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for JobStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, to } => JobStoreError::InvalidTransition { from, to },
            other => JobStoreError::Storage(other.to_string()),
        }
    }
}

/// Precondition shared by every store's `compare_and_swap_status`.
pub(crate) fn check_transition(from: JobStatus, to: JobStatus) -> Result<(), JobStoreError> {
    from.transition(to)?;
    Ok(())
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".into()))
    }

    /// Run `f` on the record if it is at `generation` and RUNNING.
    fn with_running(
        &self,
        id: JobId,
        generation: u64,
        f: impl FnOnce(&mut Job),
    ) -> Result<bool, JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&id) {
            Some(job) if job.run_generation == generation && job.status == JobStatus::Running => {
                f(job);
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(JobStoreError::NotFound(id)),
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: Job) -> Result<Job, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(filter.limit);
        Ok(result)
    }

    fn in_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        result.sort_by_key(|j| (j.created_at, j.id));
        Ok(result)
    }

    fn compare_and_swap_status(
        &self,
        id: JobId,
        generation: u64,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobStoreError> {
        check_transition(expected, update.to)?;
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.run_generation != generation || job.status != expected {
            return Ok(false);
        }
        job.apply(update, Utc::now());
        Ok(true)
    }

    fn append_log(&self, id: JobId, generation: u64, message: &str) -> Result<bool, JobStoreError> {
        self.with_running(id, generation, |job| job.logs.push(LogEntry::now(message)))
    }

    fn set_progress(
        &self,
        id: JobId,
        generation: u64,
        percent: u8,
        step: &str,
    ) -> Result<bool, JobStoreError> {
        self.with_running(id, generation, |job| {
            job.progress = job.progress.max(percent.min(100));
            job.current_step = Some(step.to_string());
        })
    }

    fn merge_metadata(
        &self,
        id: JobId,
        generation: u64,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, JobStoreError> {
        self.with_running(id, generation, |job| {
            job.metadata.insert(key.to_string(), value);
        })
    }

    fn claim_next(&self, kinds: &[JobKind], skip: &HashSet<JobId>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;

        let next = jobs
            .values()
            .filter(|j| {
                (j.status == JobStatus::Queued || j.is_resumable())
                    && kinds.contains(&j.kind)
                    && !skip.contains(&j.id)
            })
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let message = if job.status == JobStatus::NeedsInput {
            "Resumed with operator input".to_string()
        } else {
            format!("Run {} started", job.run_generation)
        };
        job.apply(StatusUpdate::to(JobStatus::Running).with_log(message), now);

        let claimed = job.clone();
        job.pending_input = None;
        Ok(Some(claimed))
    }

    fn begin_retry(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if !job.status.is_retryable() {
            return Ok(None);
        }
        job.reset_for_retry(Utc::now());
        Ok(Some(job.clone()))
    }

    fn supply_input(
        &self,
        id: JobId,
        generation: u64,
        decision: serde_json::Value,
    ) -> Result<bool, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if job.run_generation != generation || job.status != JobStatus::NeedsInput {
            return Ok(false);
        }
        let now = Utc::now();
        job.pending_input = Some(decision);
        job.updated_at = now;
        job.logs.push(LogEntry {
            timestamp: now,
            message: "Operator input received".to_string(),
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobFailure;
    use kitchenline_core::PrincipalId;
    use serde_json::json;

    const ALL: &[JobKind] = &JobKind::ALL;

    fn menu_job() -> Job {
        Job::new(JobKind::MenuImport, json!({"restaurant_name": "GF"}), PrincipalId::new())
    }

    #[test]
    fn create_and_claim_fifo() {
        let store = InMemoryJobStore::new();
        let first = store.create(menu_job()).unwrap();
        let second = store.create(menu_job()).unwrap();

        let claimed = store.claim_next(ALL, &HashSet::new()).unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        let skip: HashSet<JobId> = [second.id].into_iter().collect();
        assert!(store.claim_next(ALL, &skip).unwrap().is_none());
        assert_eq!(store.claim_next(ALL, &HashSet::new()).unwrap().unwrap().id, second.id);
        assert!(store.claim_next(ALL, &HashSet::new()).unwrap().is_none());
    }

    #[test]
    fn claim_respects_kinds() {
        let store = InMemoryJobStore::new();
        store.create(menu_job()).unwrap();
        assert!(store
            .claim_next(&[JobKind::ArGenerate], &HashSet::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn stale_generation_writes_are_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();
        store.claim_next(ALL, &HashSet::new()).unwrap();

        assert!(store.set_progress(job.id, 1, 40, "Extraction").unwrap());
        assert!(!store.set_progress(job.id, 2, 50, "Extraction").unwrap());
        assert!(!store.append_log(job.id, 0, "stale").unwrap());

        assert!(store
            .compare_and_swap_status(
                job.id,
                1,
                JobStatus::Running,
                StatusUpdate::to(JobStatus::Failed).with_error(JobFailure::new("Extraction", "x")),
            )
            .unwrap());
        // No longer RUNNING: even the right generation is refused.
        assert!(!store.append_log(job.id, 1, "late").unwrap());
        assert!(!store.merge_metadata(job.id, 1, "k", json!(1)).unwrap());

        let stored = store.get(job.id).unwrap().unwrap();
        assert_eq!(stored.progress, 40);
        assert!(stored.logs.iter().all(|l| l.message != "late"));
    }

    #[test]
    fn progress_never_decreases() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();
        store.claim_next(ALL, &HashSet::new()).unwrap();

        assert!(store.set_progress(job.id, 1, 60, "Enhancement").unwrap());
        assert!(store.set_progress(job.id, 1, 30, "Enhancement").unwrap());
        assert_eq!(store.get(job.id).unwrap().unwrap().progress, 60);
    }

    #[test]
    fn cas_rejects_mismatch_and_illegal_transitions() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();

        assert!(!store
            .compare_and_swap_status(job.id, 1, JobStatus::Running, StatusUpdate::to(JobStatus::Completed))
            .unwrap());
        assert!(matches!(
            store.compare_and_swap_status(job.id, 1, JobStatus::Queued, StatusUpdate::to(JobStatus::Completed)),
            Err(JobStoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.compare_and_swap_status(JobId::new(), 1, JobStatus::Queued, StatusUpdate::to(JobStatus::Canceled)),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn completed_job_cannot_be_swapped_back_to_running() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();
        store.claim_next(&[JobKind::MenuImport], &HashSet::new()).unwrap().unwrap();
        assert!(store
            .compare_and_swap_status(job.id, 1, JobStatus::Running, StatusUpdate::to(JobStatus::Completed))
            .unwrap());

        let err = store
            .compare_and_swap_status(job.id, 1, JobStatus::Completed, StatusUpdate::to(JobStatus::Running))
            .unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Running
            }
        ));
        assert_eq!(store.get(job.id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn domain_transition_errors_keep_their_statuses() {
        let err: JobStoreError = JobStatus::Canceled.transition(JobStatus::Completed).unwrap_err().into();
        assert_eq!(err.to_string(), "illegal transition CANCELED -> COMPLETED");
        assert!(check_transition(JobStatus::Canceled, JobStatus::Queued).is_ok());
    }

    #[test]
    fn retry_only_from_failed_or_canceled() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();
        assert!(store.begin_retry(job.id).unwrap().is_none());

        store
            .compare_and_swap_status(job.id, 1, JobStatus::Queued, StatusUpdate::to(JobStatus::Canceled))
            .unwrap();
        let retried = store.begin_retry(job.id).unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert_eq!(retried.run_generation, 2);
        assert!(matches!(store.begin_retry(JobId::new()), Err(JobStoreError::NotFound(_))));
    }

    #[test]
    fn needs_input_is_claimable_only_after_decision() {
        let store = InMemoryJobStore::new();
        let job = store.create(menu_job()).unwrap();
        store.claim_next(ALL, &HashSet::new()).unwrap();
        store.set_progress(job.id, 1, 8, "Discovery").unwrap();
        store
            .compare_and_swap_status(job.id, 1, JobStatus::Running, StatusUpdate::to(JobStatus::NeedsInput))
            .unwrap();

        assert!(store.claim_next(ALL, &HashSet::new()).unwrap().is_none());
        assert!(!store.supply_input(job.id, 2, json!({"url": "x"})).unwrap());
        assert!(store.supply_input(job.id, 1, json!({"url": "https://gf.example"})).unwrap());

        let claimed = store.claim_next(ALL, &HashSet::new()).unwrap().unwrap();
        assert_eq!(claimed.run_generation, 1);
        assert_eq!(claimed.progress, 8);
        assert_eq!(claimed.pending_input, Some(json!({"url": "https://gf.example"})));
        assert!(store.get(job.id).unwrap().unwrap().pending_input.is_none());
    }

    #[test]
    fn list_is_newest_first_and_filtered() {
        let store = InMemoryJobStore::new();
        let a = store.create(menu_job()).unwrap();
        let b = store
            .create(Job::new(JobKind::ArGenerate, json!({}), PrincipalId::new()))
            .unwrap();
        let c = store.create(menu_job()).unwrap();

        let all = store.list(&JobFilter::default()).unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![c.id, b.id, a.id]);

        let menus = store.list(&JobFilter::default().with_kind(JobKind::MenuImport).with_limit(1)).unwrap();
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].id, c.id);
    }
}
