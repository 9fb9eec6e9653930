//! Registry of runs currently executing in this process.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use kitchenline_core::JobId;
use kitchenline_pipeline::CancellationToken;

/// One entry per job a worker is executing, keyed by job id.
///
/// Shared by the dispatcher (which claims under this lock so the same job is
/// never started twice) and the job service (which flips tokens on cancel).
/// An id stays registered until its worker has actually returned, even if the
/// run was canceled earlier.
#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: Mutex<HashMap<JobId, ActiveRun>>,
}

#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub generation: u64,
    pub token: CancellationToken,
}

pub(crate) struct RunsGuard<'a> {
    inner: MutexGuard<'a, HashMap<JobId, ActiveRun>>,
}

impl RunsGuard<'_> {
    pub(crate) fn busy_ids(&self) -> HashSet<JobId> {
        self.inner.keys().copied().collect()
    }

    pub(crate) fn register(&mut self, id: JobId, generation: u64) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner.insert(
            id,
            ActiveRun {
                generation,
                token: token.clone(),
            },
        );
        token
    }
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<JobId, ActiveRun>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.runs.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn lock(&self) -> RunsGuard<'_> {
        RunsGuard { inner: self.guard() }
    }

    /// Flip the cancellation token of `id`'s run if it is at `generation`.
    pub fn cancel(&self, id: JobId, generation: u64) -> bool {
        match self.guard().get(&id) {
            Some(run) if run.generation == generation => {
                run.token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, id: JobId) -> bool {
        self.guard().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn finish(&self, id: JobId) {
        self.guard().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_targets_matching_generation_only() {
        let runs = ActiveRuns::new();
        let id = JobId::new();
        let token = runs.lock().register(id, 2);

        assert!(!runs.cancel(id, 1));
        assert!(!token.is_canceled());
        assert!(runs.cancel(id, 2));
        assert!(token.is_canceled());

        assert!(runs.is_active(id));
        runs.finish(id);
        assert!(!runs.is_active(id));
        assert!(runs.is_empty());
    }
}
