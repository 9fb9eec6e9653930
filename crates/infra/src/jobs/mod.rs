//! Job lifecycle: durable records, the worker pool that drives pipelines, and
//! the client-facing operations.
//!
//! ## Components
//!
//! - `Job`: the durable record, with `run_generation` fencing stale writers
//! - `JobStore`: conditional-write persistence (in-memory or Postgres)
//! - `JobDispatcher`: bounded worker pool, one active run per job id
//! - `StoreReporter`: the progress sink a run writes through
//! - `JobService`: submit / get / list / cancel / retry / resume / download
//! - `Watchdog`: cancels overdue runs, expires unanswered pauses

pub mod dispatcher;
pub mod postgres;
pub mod reporter;
pub mod runs;
pub mod service;
pub mod store;
pub mod types;
pub mod watchdog;

pub use dispatcher::{DispatcherConfig, DispatcherHandle, DispatcherStats, JobDispatcher, RunEnd};
pub use postgres::PostgresJobStore;
pub use reporter::StoreReporter;
pub use runs::{ActiveRun, ActiveRuns};
pub use service::{JobService, JobServiceError};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    Job, JobFailure, JobFilter, LogEntry, Metadata, NEEDS_INPUT_KEY, RESUME_KEY, StatusUpdate,
};
pub use watchdog::{SweepReport, Watchdog, WatchdogConfig, WatchdogHandle};
