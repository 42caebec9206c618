use tracing::info;

use jobkeeper_core::{Job, JobError, JobResult, SchedulerResult};

use super::scheduler::Scheduler;

/// Completion hooks supplied with every submission.
///
/// Invoked on the worker thread that ran the job.
pub trait JobCallback: Send + Sync {
    fn on_succeeded(&self, scheduler: &Scheduler, job: &Job, result: &JobResult);

    fn on_failed(&self, scheduler: &Scheduler, job: &Job, result: &JobResult);

    fn on_cancelled(&self, scheduler: &Scheduler, job: &Job);

    /// Asynchronous failure while deciding on or executing the job.
    ///
    /// An `Err` returned here is delivered to this handler once more.
    fn on_exception(&self, scheduler: &Scheduler, job: &Job, cause: &JobError) -> SchedulerResult<()>;
}

/// Callback that only logs outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl JobCallback for LoggingCallback {
    fn on_succeeded(&self, _scheduler: &Scheduler, job: &Job, result: &JobResult) {
        info!(job_id = %job.id(), result = ?result.result_data, "job succeeded");
    }

    fn on_failed(&self, _scheduler: &Scheduler, job: &Job, result: &JobResult) {
        info!(job_id = %job.id(), reason = ?result.failure_message, "job failed");
    }

    fn on_cancelled(&self, _scheduler: &Scheduler, job: &Job) {
        info!(job_id = %job.id(), "job cancelled");
    }

    fn on_exception(&self, _scheduler: &Scheduler, job: &Job, cause: &JobError) -> SchedulerResult<()> {
        info!(job_id = %job.id(), error = %cause, "job execution error");
        Ok(())
    }
}
