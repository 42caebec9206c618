//! Scheduler runtime: storage port, worker pool, timers and the public API.

pub mod config;
pub mod jobs;

pub use config::SchedulerConfig;
pub use jobs::{
    CancellationToken, ExecutionTemplate, InMemoryJobStore, JobCallback, JobProcessor, JobStore, JobWork,
    LoggingCallback, NoOpWork, ProcessorRegistry, Scheduler, StopReason,
};
