//! `jobkeeper-core` — job data model.
//!
//! This crate contains the **pure data** side of the scheduler: the job record,
//! its status state machine, execution outcomes and the error taxonomy. No
//! threads, no storage.

pub mod error;
pub mod id;
pub mod job;
pub mod result;
pub mod status;

pub use error::{JobError, JobErrorKind, SchedulerResult};
pub use id::JobId;
pub use job::{Job, JobPriority, JobType, TargetKey};
pub use result::{JobResult, JobResultType};
pub use status::JobStatus;
