//! Execution template: the fixed control flow around job business logic.
//!
//! ## Flow
//!
//! 1. Move the job to RUNNING; if another writer already advanced it, stop
//!    without running any business logic
//! 2. Run [`JobWork::execute`], which polls its [`CancellationToken`] at safe
//!    checkpoints
//! 3. Persist the outcome (SUCCEEDED / FAILED; CANCELLED is already written by
//!    the checkpoint) and invoke the matching callback
//!
//! Work that never polls its token cannot be cancelled until it returns on its
//! own; only the external legacy sweep can then force the status.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use jobkeeper_core::{Job, JobResult, JobResultType, JobStatus, SchedulerResult};

use super::callback::JobCallback;
use super::scheduler::Scheduler;

/// Processes a job of one [`JobType`](jobkeeper_core::JobType).
pub trait JobProcessor: Send {
    fn process_job(&self, job: Job, callback: Arc<dyn JobCallback>) -> SchedulerResult<()>;
}

/// Business logic plugged into [`ExecutionTemplate`].
pub trait JobWork: Send + Sync {
    /// Do the work. Must poll `token` at a bounded interval.
    fn execute(&self, job: &Job, token: &CancellationToken<'_>) -> SchedulerResult<JobResult>;

    /// Clean up after a cooperative cancel request (temp files, etc).
    fn handle_request_for_cancel(&self, job: &Job);

    /// Clean up after the job was forced to CANCELLED externally (e.g. expiry).
    fn handle_force_cancelled(&self, job: &Job);
}

/// Why running work should stop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Soft: a newer submission asked for the target. CANCELLED has been written.
    Requested,
    /// The job was already CANCELLED by an external actor.
    Forced,
}

/// Cancellation capability handed to [`JobWork::execute`].
///
/// Every check reads the persisted status; nothing is cached.
pub struct CancellationToken<'a> {
    scheduler: &'a Scheduler,
    job: &'a Job,
    work: &'a dyn JobWork,
}

impl<'a> CancellationToken<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler, job: &'a Job, work: &'a dyn JobWork) -> Self {
        Self { scheduler, job, work }
    }

    pub fn job(&self) -> &Job {
        self.job
    }

    /// Non-blocking "should I stop, and why".
    ///
    /// Runs the matching cleanup hook before answering. Fails with
    /// `Interrupted` once the scheduler is being forcibly stopped.
    pub fn should_stop(&self) -> SchedulerResult<Option<StopReason>> {
        if self.check_for_request_for_cancel()? {
            return Ok(Some(StopReason::Requested));
        }
        if self.check_for_force_cancelled()? {
            return Ok(Some(StopReason::Forced));
        }
        Ok(None)
    }

    /// True if the job was asked to cancel; the cleanup hook has run and the job
    /// is now CANCELLED.
    pub fn check_for_request_for_cancel(&self) -> SchedulerResult<bool> {
        self.scheduler.ensure_not_interrupted()?;
        if !self.scheduler.is_job_request_for_cancel(self.job)? {
            return Ok(false);
        }

        debug!(job_id = %self.job.id(), "cancel requested; cleaning up");
        self.work.handle_request_for_cancel(self.job);
        let mut job = self.job.clone();
        self.scheduler.update_job_status(&mut job, JobStatus::Cancelled)?;
        Ok(true)
    }

    /// True if the job was already forced to CANCELLED; the cleanup hook has run.
    pub fn check_for_force_cancelled(&self) -> SchedulerResult<bool> {
        self.scheduler.ensure_not_interrupted()?;
        if !self.scheduler.is_job_cancelled(self.job)? {
            return Ok(false);
        }

        debug!(job_id = %self.job.id(), "job force cancelled; cleaning up");
        self.work.handle_force_cancelled(self.job);
        self.scheduler.forget_running(&self.job.id());
        Ok(true)
    }

    /// Sleep for `total`, checking for cancellation every `poll_every`.
    pub fn pause(&self, total: Duration, poll_every: Duration) -> SchedulerResult<Option<StopReason>> {
        let deadline = Instant::now() + total;
        loop {
            if let Some(reason) = self.should_stop()? {
                return Ok(Some(reason));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(poll_every.min(deadline - now));
        }
    }
}

/// Wraps a [`JobWork`] with the fixed run/cancel/report sequence.
pub struct ExecutionTemplate<W> {
    scheduler: Scheduler,
    work: W,
}

impl<W: JobWork> ExecutionTemplate<W> {
    pub fn new(scheduler: Scheduler, work: W) -> Self {
        Self { scheduler, work }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl<W: JobWork> JobProcessor for ExecutionTemplate<W> {
    fn process_job(&self, mut job: Job, callback: Arc<dyn JobCallback>) -> SchedulerResult<()> {
        let scheduler = &self.scheduler;

        if !scheduler.update_job_status(&mut job, JobStatus::Running)? {
            debug!(job_id = %job.id(), "job already advanced elsewhere; not starting");
            return Ok(());
        }

        let result = {
            let token = CancellationToken::new(scheduler, &job, &self.work);
            self.work.execute(&job, &token)?
        };

        if let Some(detail) = result.result_data.as_ref().or(result.failure_message.as_ref()) {
            job.set_detail(detail.clone());
        }

        match result.result_type {
            JobResultType::Succeeded => {
                if !scheduler.update_job_status(&mut job, JobStatus::Succeeded)? {
                    warn!(job_id = %job.id(), status = %job.status(), "SUCCEEDED rejected by store");
                    scheduler.forget_running(&job.id());
                }
                callback.on_succeeded(scheduler, &job, &result);
            }
            JobResultType::Failed => {
                if !scheduler.update_job_status(&mut job, JobStatus::Failed)? {
                    warn!(job_id = %job.id(), status = %job.status(), "FAILED rejected by store");
                    scheduler.forget_running(&job.id());
                }
                callback.on_failed(scheduler, &job, &result);
            }
            JobResultType::Cancelled => {
                // Written by the checkpoint (or externally); refresh the local copy.
                if let Some(current) = scheduler.get_job(job.id())? {
                    job.apply_status(current.status(), current.end_time().unwrap_or_else(chrono::Utc::now));
                }
                callback.on_cancelled(scheduler, &job);
            }
        }

        Ok(())
    }
}
