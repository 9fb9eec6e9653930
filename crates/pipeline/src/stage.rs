//! The stage contract.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::StageContext;
use crate::error::{DefaultErrorPolicy, ErrorPolicy, PipelineError, StageError};
use crate::retry::RetryPolicy;

/// State threaded through a pipeline: built from the job input, passed from
/// stage to stage, and serialized when a run pauses for input.
pub trait PipelineState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind-specific input payload as submitted.
    type Input: Serialize + DeserializeOwned;

    /// Validate and normalize a submitted input. Errors reject the submission.
    fn validate(input: Self::Input) -> Result<Self::Input, PipelineError>;

    fn from_input(input: Self::Input) -> Self;

    /// Artifact reference produced by the final stage, if any.
    fn result_ref(&self) -> Option<&str>;

    /// Validate and normalize an operator decision for a paused run.
    fn validate_resolution(decision: &serde_json::Value) -> Result<serde_json::Value, PipelineError>;

    /// Fold a (validated) operator decision into the paused state.
    fn apply_resolution(&mut self, decision: &serde_json::Value) -> Result<(), PipelineError>;
}

/// One sequenced unit of pipeline work.
///
/// `run` receives the prior stage's output and returns this stage's output.
/// It must be safe to call again from scratch after a failed attempt.
pub trait Stage<S>: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &StageContext<'_>, state: &S) -> Result<S, StageError>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn error_policy(&self) -> &dyn ErrorPolicy {
        &DefaultErrorPolicy
    }
}
