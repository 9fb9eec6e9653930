//! Infrastructure layer: job persistence, the worker pool, artifact storage
//! and clients for the external services the pipelines call.

pub mod artifacts;
pub mod external;
pub mod jobs;

#[cfg(test)]
mod integration_tests;
