//! Status/log reporter: the pipeline's [`ProgressSink`] backed by a job store.

use std::sync::Arc;

use tracing::warn;

use kitchenline_core::JobId;
use kitchenline_pipeline::ProgressSink;

use super::store::{JobStore, JobStoreError};

/// Writes progress, log lines and metadata for one run.
///
/// Every write is conditional on the run's generation. Storage errors are
/// logged and treated as accepted: only a definitive precondition failure
/// tells the stage its run has been superseded.
pub struct StoreReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    generation: u64,
}

impl StoreReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId, generation: u64) -> Self {
        Self {
            store,
            job_id,
            generation,
        }
    }

    fn accepted(&self, op: &str, result: Result<bool, JobStoreError>) -> bool {
        match result {
            Ok(applied) => applied,
            Err(JobStoreError::NotFound(_)) => false,
            Err(e) => {
                warn!(
                    job_id = %self.job_id,
                    run_generation = self.generation,
                    operation = op,
                    error = %e,
                    "job store write failed"
                );
                true
            }
        }
    }
}

impl ProgressSink for StoreReporter {
    fn set_progress(&self, percent: u8, step: &str) -> bool {
        let result = self
            .store
            .set_progress(self.job_id, self.generation, percent, step);
        self.accepted("set_progress", result)
    }

    fn append_log(&self, message: &str) -> bool {
        let result = self.store.append_log(self.job_id, self.generation, message);
        self.accepted("append_log", result)
    }

    fn merge_metadata(&self, key: &str, value: serde_json::Value) -> bool {
        let result = self
            .store
            .merge_metadata(self.job_id, self.generation, key, value);
        self.accepted("merge_metadata", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::Job;
    use kitchenline_core::{JobKind, PrincipalId};
    use std::collections::HashSet;

    #[test]
    fn writes_land_only_for_the_current_run() {
        let store = InMemoryJobStore::arc();
        let job = store
            .create(Job::new(JobKind::MenuImport, serde_json::json!({}), PrincipalId::new()))
            .unwrap();
        store.claim_next(&JobKind::ALL, &HashSet::new()).unwrap();

        let current = StoreReporter::new(store.clone(), job.id, 1);
        let stale = StoreReporter::new(store.clone(), job.id, 0);

        assert!(current.set_progress(25, "Acquisition"));
        assert!(current.append_log("Fetching https://gf.example"));
        assert!(!stale.append_log("ghost"));
        assert!(!StoreReporter::new(store.clone(), JobId::new(), 1).append_log("nobody"));

        let stored = store.get(job.id).unwrap().unwrap();
        assert_eq!(stored.progress, 25);
        assert_eq!(stored.current_step.as_deref(), Some("Acquisition"));
        assert!(stored.logs.iter().any(|l| l.message == "Fetching https://gf.example"));
        assert!(stored.logs.iter().all(|l| l.message != "ghost"));
    }
}
