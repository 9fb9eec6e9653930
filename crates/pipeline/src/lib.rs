//! `kitchenline-pipeline`
//!
//! **Responsibility:** the stage contract and the pipeline execution loop.
//!
//! This crate is storage-agnostic:
//! - Stages talk to the outside world only through collaborator traits.
//! - Progress, logs and metadata leave through a [`ProgressSink`].
//! - Job status transitions are the dispatcher's business, not the loop's; the
//!   loop reports a [`PipelineOutcome`].

pub mod ar_generate;
pub mod artifact;
pub mod cancel;
pub mod context;
pub mod definition;
pub mod error;
pub mod menu_import;
pub mod registry;
pub mod retry;
pub mod stage;

pub use artifact::{ArtifactError, ArtifactStore, StoredArtifact};
pub use cancel::CancellationToken;
pub use context::{ProgressSink, StageContext};
pub use definition::{JobPipeline, PipelineDefinition, PipelineOutcome, ResumePoint, RunRequest};
pub use error::{
    DefaultErrorPolicy, ErrorClass, ErrorPolicy, PipelineError, ServiceError, ServiceErrorKind,
    StageError,
};
pub use registry::PipelineRegistry;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use stage::{PipelineState, Stage};
