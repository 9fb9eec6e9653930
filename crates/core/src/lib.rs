//! `kitchenline-core`: domain foundation for the job lifecycle.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job kind catalogue, and the job status state machine.

pub mod error;
pub mod id;
pub mod kind;
pub mod status;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, PrincipalId};
pub use kind::JobKind;
pub use status::JobStatus;
