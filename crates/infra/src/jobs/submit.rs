//! One submission attempt: run now, defer, or abandon.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use jobkeeper_core::{Job, JobError, JobStatus, SchedulerResult};

use super::callback::JobCallback;
use super::scheduler::Scheduler;

/// A queued attempt: the job plus the caller's callback.
pub(crate) struct Submission {
    pub(crate) job: Job,
    pub(crate) callback: Arc<dyn JobCallback>,
}

/// Run one attempt on the current pool thread.
///
/// Nothing escapes: failures land in the job's status and the callback's
/// `on_exception`.
pub(crate) fn run_submission(scheduler: &Scheduler, submission: Submission) {
    let Submission { job, callback } = submission;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| attempt(scheduler, &job, &callback)))
        .unwrap_or_else(|payload| {
            Err(JobError::execution_failed(format!(
                "job panicked: {}",
                panic_message(&*payload)
            )))
        });

    match outcome {
        Ok(()) => {}
        Err(err) if err.is_interrupted() => {
            info!(job_id = %job.id(), error = %err, "job interrupted by shutdown");
        }
        Err(err) => {
            warn!(job_id = %job.id(), error = %err, "job execution error");
            deliver_exception(scheduler, job, callback.as_ref(), err);
        }
    }
}

fn attempt(scheduler: &Scheduler, job: &Job, callback: &Arc<dyn JobCallback>) -> SchedulerResult<()> {
    let Some(latest) = scheduler.get_latest_job(job.target(), job.job_type())? else {
        debug!(job_id = %job.id(), "job no longer stored; abandoning");
        return Ok(());
    };

    if latest.id() != job.id() {
        debug!(job_id = %job.id(), latest = %latest.id(), "job superseded; abandoning");
        return Ok(());
    }

    if let Some(mut running) = scheduler.get_running_job(job.target(), job.job_type())? {
        if running.status() == JobStatus::Running {
            scheduler.update_job_status(&mut running, JobStatus::RequestForCancel)?;
        }
        debug!(
            job_id = %job.id(),
            running = %running.id(),
            backoff = ?scheduler.config().conflict_backoff,
            "target busy; deferring"
        );
        return scheduler.schedule_job(job.clone(), scheduler.config().conflict_backoff, Arc::clone(callback));
    }

    debug!(job_id = %job.id(), job_type = %job.job_type(), "dispatching job");
    let processor = scheduler.processors().create(scheduler, job.job_type())?;
    processor.process_job(job.clone(), Arc::clone(callback))
}

fn deliver_exception(scheduler: &Scheduler, mut job: Job, callback: &dyn JobCallback, cause: JobError) {
    match scheduler.update_job_status(&mut job, JobStatus::Error) {
        Ok(true) => {}
        Ok(false) => debug!(job_id = %job.id(), "job already finished; ERROR not recorded"),
        Err(e) => warn!(job_id = %job.id(), error = %e, "could not record job error"),
    }

    let Err(handler_err) = call_on_exception(scheduler, &job, callback, &cause) else {
        return;
    };
    warn!(job_id = %job.id(), error = %handler_err, "exception handler failed; redelivering");

    if let Err(fatal) = call_on_exception(scheduler, &job, callback, &handler_err) {
        error!(job_id = %job.id(), error = %fatal, "exception handler failed twice");
    }
}

fn call_on_exception(scheduler: &Scheduler, job: &Job, callback: &dyn JobCallback, cause: &JobError) -> SchedulerResult<()> {
    panic::catch_unwind(AssertUnwindSafe(|| callback.on_exception(scheduler, job, cause))).unwrap_or_else(|payload| {
        Err(JobError::execution_failed(format!(
            "exception handler panicked: {}",
            panic_message(&*payload)
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
