//! Job status state machine.
//!
//! Status is a closed enum and every status change in the workspace goes
//! through [`JobStatus::transition`], so the table below is the only place the
//! lifecycle rules live.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    /// Paused awaiting an external decision. Not terminal.
    NeedsInput,
    Failed,
    Completed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::NeedsInput,
        JobStatus::Failed,
        JobStatus::Completed,
        JobStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::NeedsInput => "NEEDS_INPUT",
            JobStatus::Failed => "FAILED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Canceled => "CANCELED",
        }
    }

    /// COMPLETED, FAILED and CANCELED.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Whether a cancel request is accepted in this status.
    pub fn is_cancelable(&self) -> bool {
        self.can_transition_to(JobStatus::Canceled)
    }

    /// Whether an operator retry is accepted in this status.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Canceled)
    }

    /// The central transition table.
    ///
    /// RUNNING -> RUNNING (stage-to-stage progress) is not a status change and
    /// is not listed; progress writes never go through here.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Running, NeedsInput)
                | (NeedsInput, Running)
                | (Running, Completed)
                | (Queued | Running | NeedsInput, Failed)
                | (Queued | Running | NeedsInput, Canceled)
                | (Failed | Canceled, Queued)
        )
    }

    /// Validate `self -> to`, returning the new status.
    pub fn transition(self, to: JobStatus) -> DomainResult<JobStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::invalid_transition(self, to))
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| DomainError::validation(format!("unknown job status: {s}")))
    }
}
