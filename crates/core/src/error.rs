//! Job error model.

use thiserror::Error;

/// Result type used by every fallible scheduler and storage operation.
pub type SchedulerResult<T> = Result<T, JobError>;

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed classification of job failures.
///
/// Callers branch on the kind, never on the message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JobErrorKind {
    /// Malformed request (e.g. missing stripe, job not in its initial status).
    InvalidInput,
    /// No persisted record for the requested id.
    JobNotFound,
    /// The storage backend did not return a created record.
    CreationFailed,
    /// The storage backend failed to apply an update.
    UpdateFailed,
    /// The storage backend failed to answer a query.
    QueryError,
    /// Admission control or the worker pool refused the job.
    JobRejected,
    /// Missing or inconsistent internal configuration.
    InternalError,
    /// No processor is registered for the job type.
    JobTypeNotSupported,
    /// The legacy-job sweep failed.
    CleanJobFailed,
    /// Business logic failed (or panicked) while executing.
    JobExecutionFailed,
    /// Work was interrupted, typically by a forced shutdown.
    Interrupted,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::InvalidInput => "INVALID_INPUT",
            JobErrorKind::JobNotFound => "JOB_NOT_FOUND",
            JobErrorKind::CreationFailed => "CREATION_FAILED",
            JobErrorKind::UpdateFailed => "UPDATE_FAILED",
            JobErrorKind::QueryError => "QUERY_ERROR",
            JobErrorKind::JobRejected => "JOB_REJECTED",
            JobErrorKind::InternalError => "INTERNAL_ERROR",
            JobErrorKind::JobTypeNotSupported => "JOB_TYPE_NOT_SUPPORTED",
            JobErrorKind::CleanJobFailed => "CLEAN_JOB_FAILED",
            JobErrorKind::JobExecutionFailed => "JOB_EXECUTION_FAILED",
            JobErrorKind::Interrupted => "INTERRUPTED",
        }
    }
}

impl core::fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by job scheduling, storage and execution.
#[derive(Debug, Error)]
#[error("{kind} : {message}")]
pub struct JobError {
    kind: JobErrorKind,
    message: String,
    #[source]
    source: Option<BoxedCause>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, cause: impl Into<BoxedCause>) -> Self {
        self.source = Some(cause.into());
        self
    }

    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == JobErrorKind::Interrupted
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InvalidInput, msg)
    }

    pub fn job_not_found(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::JobNotFound, msg)
    }

    pub fn creation_failed(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::CreationFailed, msg)
    }

    pub fn update_failed(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::UpdateFailed, msg)
    }

    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::QueryError, msg)
    }

    pub fn job_rejected(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::JobRejected, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InternalError, msg)
    }

    pub fn job_type_not_supported(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::JobTypeNotSupported, msg)
    }

    pub fn clean_job_failed(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::CleanJobFailed, msg)
    }

    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::JobExecutionFailed, msg)
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::new(JobErrorKind::Interrupted, msg)
    }
}
