//! The scheduler: public submission/query/cancel/shutdown API.
//!
//! A `Scheduler` is a cheap, cloneable handle. Every clone refers to the same
//! worker pool, delay timer, heartbeat daemon and running-set, so the process
//! constructs one and passes it around. Building a second one gives an
//! independent scheduler with its own threads; configuration of an existing
//! scheduler never changes after start.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use jobkeeper_core::{Job, JobError, JobId, JobStatus, JobType, SchedulerResult, TargetKey};

use crate::config::SchedulerConfig;

use super::callback::JobCallback;
use super::heartbeat::HeartbeatHandle;
use super::pool::{PoolError, WorkerPool};
use super::registry::ProcessorRegistry;
use super::running::RunningSet;
use super::store::JobStore;
use super::submit::{run_submission, Submission};
use super::timer::{DelayTimer, TimerCancelled};

type SchedulerLink = Arc<OnceLock<Weak<SchedulerInner>>>;

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    processors: ProcessorRegistry,
    pool: WorkerPool<Submission>,
    timer: DelayTimer<Submission>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    running: RunningSet,
    stopped: AtomicBool,
    interrupted: AtomicBool,
}

impl SchedulerInner {
    fn heartbeat(&self) -> MutexGuard<'_, Option<HeartbeatHandle>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.timer.cancel();
        self.pool.shutdown();
        let heartbeat = self.heartbeat().take();
        if let Some(handle) = heartbeat {
            handle.stop();
        }
    }
}

fn upgrade(link: &SchedulerLink) -> Option<Scheduler> {
    link.get()
        .and_then(Weak::upgrade)
        .map(|inner| Scheduler { inner })
}

/// Handle to a running scheduler. Clones share one instance.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Start a scheduler with the default processors (no-op jobs only).
    pub fn start(config: SchedulerConfig, store: Arc<dyn JobStore>) -> SchedulerResult<Self> {
        Self::with_processors(config, store, ProcessorRegistry::default())
    }

    /// Start the worker pool, delay timer and heartbeat daemon.
    pub fn with_processors(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        processors: ProcessorRegistry,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let link: SchedulerLink = Arc::new(OnceLock::new());

        let pool_link = Arc::clone(&link);
        let pool = WorkerPool::new(
            config.thread_name_prefix.clone(),
            config.core_pool_size,
            config.max_pool_size,
            move |submission: Submission| match upgrade(&pool_link) {
                Some(scheduler) => run_submission(&scheduler, submission),
                None => debug!(job_id = %submission.job.id(), "scheduler gone; dropping submission"),
            },
        );

        let timer_link = Arc::clone(&link);
        let timer = DelayTimer::start(
            format!("{}-rescheduler", config.thread_name_prefix),
            move |submission: Submission| match upgrade(&timer_link) {
                Some(scheduler) => scheduler.requeue(submission),
                None => debug!(job_id = %submission.job.id(), "scheduler gone; dropping deferred submission"),
            },
        )
        .map_err(|e| JobError::internal("failed to start delay timer").with_source(e))?;

        let inner = Arc::new(SchedulerInner {
            config,
            store,
            processors,
            pool,
            timer,
            heartbeat: Mutex::new(None),
            running: RunningSet::new(),
            stopped: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        });
        let _ = link.set(Arc::downgrade(&inner));

        let scheduler = Self { inner };
        scheduler.restart_heartbeat(scheduler.inner.config.heartbeat_interval)?;

        info!(
            core_pool_size = scheduler.inner.config.core_pool_size,
            max_pool_size = scheduler.inner.config.max_pool_size,
            max_queue_size = scheduler.inner.config.max_queue_size,
            "job scheduler started"
        );
        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.inner.processors
    }

    /// Persist a new job and queue its first submission step.
    ///
    /// Admission control compares the observed queue depth against
    /// `max_queue_size` without holding the queue; a burst may over-admit
    /// slightly. A job rejected here has still been persisted.
    pub fn submit(&self, job: Job, callback: Arc<dyn JobCallback>) -> SchedulerResult<()> {
        if self.is_shutdown() {
            debug!(job_id = %job.id(), "scheduler stopped; ignoring submit");
            return Ok(());
        }

        if job.stripe().is_empty() {
            return Err(JobError::invalid_input("job has no stripe"));
        }
        if job.status() != JobStatus::NotStarted {
            return Err(JobError::invalid_input(format!(
                "job {} submitted with status {}",
                job.id(),
                job.status()
            )));
        }

        let job = self
            .inner
            .store
            .create_job(job)?
            .ok_or_else(|| JobError::creation_failed("store returned no job record"))?;

        let depth = self.inner.pool.queue_len();
        if depth >= self.inner.config.max_queue_size {
            warn!(job_id = %job.id(), depth, "job queue full; rejecting");
            return Err(JobError::job_rejected(format!(
                "queue depth {depth} reached limit {}",
                self.inner.config.max_queue_size
            )));
        }

        let priority = job.priority().value();
        let job_id = job.id();
        self.inner
            .pool
            .execute(priority, Submission { job, callback })
            .map_err(|e| JobError::job_rejected("worker pool refused the job").with_source(e))?;

        debug!(job_id = %job_id, priority, "job queued");
        Ok(())
    }

    /// Queue a submission step for an already persisted job after `delay`.
    pub fn schedule_job(&self, job: Job, delay: Duration, callback: Arc<dyn JobCallback>) -> SchedulerResult<()> {
        if self.is_shutdown() {
            debug!(job_id = %job.id(), "scheduler stopped; ignoring schedule");
            return Ok(());
        }

        let job_id = job.id();
        match self.inner.timer.schedule(delay, Submission { job, callback }) {
            Ok(()) => {
                debug!(job_id = %job_id, ?delay, "job deferred");
                Ok(())
            }
            Err(TimerCancelled) => {
                debug!(job_id = %job_id, "delay timer cancelled; dropping deferred job");
                Ok(())
            }
        }
    }

    // Deferred steps skip admission control; they were admitted once already.
    fn requeue(&self, submission: Submission) {
        let job_id = submission.job.id();
        let priority = submission.job.priority().value();
        match self.inner.pool.execute(priority, submission) {
            Ok(()) => debug!(job_id = %job_id, "deferred job re-queued"),
            Err(PoolError::Shutdown) => debug!(job_id = %job_id, "pool shut down; dropping deferred job"),
            Err(e) => warn!(job_id = %job_id, error = %e, "could not re-queue deferred job"),
        }
    }

    /// Request a status transition. Returns `false` if the store did not apply it.
    ///
    /// On success the local `job` is updated and the running-set follows the
    /// new status.
    pub fn update_job_status(&self, job: &mut Job, status: JobStatus) -> SchedulerResult<bool> {
        let affected = self.inner.store.update_job_status(job, status)?;
        if affected != 1 {
            debug!(job_id = %job.id(), from = %job.status(), to = %status, affected, "status transition not applied");
            return Ok(false);
        }

        job.apply_status(status, Utc::now());
        match status {
            JobStatus::Running | JobStatus::RequestForCancel => {
                self.inner.running.insert(job.id());
            }
            JobStatus::NotStarted => {}
            _ => {
                self.inner.running.remove(&job.id());
            }
        }
        debug!(job_id = %job.id(), status = %status, "job status updated");
        Ok(true)
    }

    pub fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>> {
        self.inner.store.get_job(job_id)
    }

    /// Current persisted status. Fails with `JobNotFound` if the record is gone.
    pub fn job_status(&self, job_id: JobId) -> SchedulerResult<JobStatus> {
        self.inner
            .store
            .get_job(job_id)?
            .map(|job| job.status())
            .ok_or_else(|| JobError::job_not_found(format!("job {job_id} not found")))
    }

    pub fn is_job_cancelled(&self, job: &Job) -> SchedulerResult<bool> {
        Ok(self.job_status(job.id())? == JobStatus::Cancelled)
    }

    pub fn is_job_request_for_cancel(&self, job: &Job) -> SchedulerResult<bool> {
        Ok(self.job_status(job.id())? == JobStatus::RequestForCancel)
    }

    pub fn is_job_running(&self, job: &Job) -> SchedulerResult<bool> {
        Ok(self.job_status(job.id())? == JobStatus::Running)
    }

    pub fn is_job_done(&self, job: &Job) -> SchedulerResult<bool> {
        Ok(self.job_status(job.id())?.is_terminal())
    }

    pub fn get_latest_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        self.inner.store.get_latest_job(target, job_type)
    }

    pub fn get_running_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        self.inner.store.get_running_job(target, job_type)
    }

    pub fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>> {
        self.inner.store.current_timestamp()
    }

    /// Cancel every unfinished job of a stripe. Returns the cancelled ids.
    pub fn cancel(&self, stripe: &str) -> SchedulerResult<Vec<JobId>> {
        let cancelled = self.inner.store.cancel_jobs(stripe)?;
        self.inner.running.remove_all(&cancelled);
        warn!(stripe = %stripe, cancelled = cancelled.len(), "stripe jobs cancelled");
        Ok(cancelled)
    }

    /// Run the store's legacy-job cleanup. Returns the number of records deleted.
    pub fn sweep_legacy_jobs(&self, max_running_time: Duration) -> SchedulerResult<usize> {
        let swept = self.inner.store.handle_legacy_jobs(max_running_time)?;
        info!(swept, ?max_running_time, "legacy jobs swept");
        Ok(swept)
    }

    /// Replace the heartbeat daemon with one ticking every `interval`.
    pub fn restart_heartbeat(&self, interval: Duration) -> SchedulerResult<()> {
        if self.is_shutdown() {
            return Ok(());
        }
        if interval.is_zero() {
            return Err(JobError::invalid_input("heartbeat interval must be positive"));
        }

        let mut slot = self.inner.heartbeat();
        if let Some(previous) = slot.take() {
            previous.stop();
        }

        let weak = Arc::downgrade(&self.inner);
        let handle = HeartbeatHandle::spawn(
            &format!("{}-keep-on-track", self.inner.config.thread_name_prefix),
            interval,
            move || {
                if let Some(inner) = weak.upgrade() {
                    Scheduler { inner }.keep_on_track();
                }
            },
        )
        .map_err(|e| JobError::internal("failed to start heartbeat daemon").with_source(e))?;
        *slot = Some(handle);

        info!(?interval, "heartbeat started");
        Ok(())
    }

    /// Refresh the liveness timestamp of every job in the running-set.
    pub fn keep_on_track(&self) {
        let ids = self.inner.running.snapshot();
        if ids.is_empty() {
            return;
        }
        match self.inner.store.keep_on_track_jobs(&ids) {
            Ok(()) => debug!(jobs = ids.len(), "running jobs kept on track"),
            Err(e) => warn!(jobs = ids.len(), error = %e, "keep-on-track failed"),
        }
    }

    /// Ids this process believes are RUNNING or REQUEST_FOR_CANCEL.
    pub fn running_job_ids(&self) -> Vec<JobId> {
        self.inner.running.snapshot()
    }

    /// Submission steps waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.inner.pool.queue_len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// True once `stop` gave up waiting and forced the pool down.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    // A job forced to CANCELLED elsewhere never passes through update_job_status.
    pub(crate) fn forget_running(&self, job_id: &JobId) {
        self.inner.running.remove(job_id);
    }

    pub(crate) fn ensure_not_interrupted(&self) -> SchedulerResult<()> {
        if self.is_interrupted() {
            return Err(JobError::interrupted("scheduler is shutting down"));
        }
        Ok(())
    }

    /// Stop the scheduler. Idempotent.
    ///
    /// Pending deferred steps are discarded, queued steps get
    /// `shutdown_poll_attempts * shutdown_poll_interval` to drain, then the
    /// queue is dropped and running work is told to stop at its next checkpoint.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.timer.cancel();
        let heartbeat = self.inner.heartbeat().take();
        if let Some(handle) = heartbeat {
            handle.stop();
        }
        self.inner.pool.shutdown();

        let config = &self.inner.config;
        let mut terminated = false;
        for _ in 0..config.shutdown_poll_attempts {
            if self.inner.pool.await_termination(config.shutdown_poll_interval) {
                terminated = true;
                break;
            }
        }

        if !terminated {
            self.inner.interrupted.store(true, Ordering::SeqCst);
            let dropped = self.inner.pool.shutdown_now();
            warn!(dropped = dropped.len(), "forced job scheduler shutdown");
        }

        info!(running = self.inner.running.len(), "job scheduler stopped");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("queue_depth", &self.queue_depth())
            .field("running", &self.inner.running.len())
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}
