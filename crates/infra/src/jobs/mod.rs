//! Background job scheduling with single-flight execution per target.
//!
//! ## Design
//!
//! - Jobs are persisted through a [`JobStore`] before they are queued
//! - A priority-ordered [`WorkerPool`] runs one submission step per attempt
//! - A submission step runs the job, defers it behind a busy target, or drops it
//!   when a newer job for the same target exists
//! - Cancellation is cooperative: work polls a [`CancellationToken`]
//! - A heartbeat daemon refreshes the liveness timestamp of running jobs
//!
//! ## Components
//!
//! - `Scheduler`: public API, owns the pool, delay timer and heartbeat
//! - `JobStore`: storage port (in-memory reference implementation included)
//! - `ExecutionTemplate`: fixed run/cancel/report flow around `JobWork`
//! - `ProcessorRegistry`: job type to processor mapping

pub mod callback;
pub mod heartbeat;
pub mod noop;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod running;
pub mod scheduler;
pub mod store;
mod submit;
pub mod timer;

pub use callback::{JobCallback, LoggingCallback};
pub use heartbeat::HeartbeatHandle;
pub use noop::NoOpWork;
pub use pool::{PoolError, WorkerPool};
pub use processor::{CancellationToken, ExecutionTemplate, JobProcessor, JobWork, StopReason};
pub use registry::{ProcessorFactory, ProcessorRegistry};
pub use running::RunningSet;
pub use scheduler::Scheduler;
pub use store::{InMemoryJobStore, JobStore, FINISHED_JOB_RETENTION};
pub use timer::{DelayTimer, TimerCancelled};
