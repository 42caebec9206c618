//! Job lifecycle status and its state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// ```text
/// NOT_STARTED ──► RUNNING ──► SUCCEEDED | FAILED | ERROR
///                    │
///                    └──► REQUEST_FOR_CANCEL ──► CANCELLED
/// ```
///
/// Besides the main edges above, an external actor (stripe teardown, legacy
/// sweep) may force any non-terminal job to CANCELLED, a job that fails before
/// it starts goes straight to ERROR, and a job that finishes without noticing a
/// cancel request may still record its own outcome.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Running,
    RequestForCancel,
    Cancelled,
    Succeeded,
    Failed,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::NotStarted,
        JobStatus::Running,
        JobStatus::RequestForCancel,
        JobStatus::Cancelled,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Error,
    ];

    /// Terminal statuses are absorbing: the job record is immutable afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Error
        )
    }

    /// Statuses that make a job "the running job" of its target.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::RequestForCancel)
    }

    /// Whether a persisted job in `self` may move to `next`.
    ///
    /// Self-transitions are rejected so a repeated update is reported as not
    /// applied.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (NotStarted, Running | Cancelled | Error) => true,
            (Running, RequestForCancel | Succeeded | Failed | Error | Cancelled) => true,
            (RequestForCancel, Cancelled | Succeeded | Failed | Error) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "NOT_STARTED",
            JobStatus::Running => "RUNNING",
            JobStatus::RequestForCancel => "REQUEST_FOR_CANCEL",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Error => "ERROR",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
