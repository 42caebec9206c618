//! Shared fixtures for scheduler integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use jobkeeper_core::{Job, JobError, JobErrorKind, JobId, JobResult, JobStatus, JobType, SchedulerResult, TargetKey};
use jobkeeper_infra::jobs::{CancellationToken, InMemoryJobStore, JobCallback, JobStore, JobWork, Scheduler};
use jobkeeper_infra::SchedulerConfig;

pub const BACKOFF: Duration = Duration::from_millis(300);
pub const WAIT: Duration = Duration::from_secs(10);

pub fn quick_config() -> SchedulerConfig {
    jobkeeper_observability::init_for_tests();
    SchedulerConfig::default()
        .with_pool_size(2, 2)
        .with_conflict_backoff(BACKOFF)
        .with_shutdown_polling(Duration::from_millis(50), 4)
}

pub fn target(name: &str) -> TargetKey {
    TargetKey::new("tenant-1", name, "table")
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn status_of(store: &dyn JobStore, id: JobId) -> JobStatus {
    store.get_job(id).unwrap().expect("job stored").status()
}

// ─────────────────────────────────────────────────────────────────────────────
// Stores
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory store that records every status update the scheduler requests.
///
/// Writes made through [`RecordingStore::inner`] play the part of another node
/// and are not recorded.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryJobStore,
    updates: Mutex<Vec<(JobId, JobStatus, usize)>>,
    keep_on_track_calls: AtomicUsize,
}

impl RecordingStore {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &InMemoryJobStore {
        &self.inner
    }

    /// Requested transitions for `id` with the rows each one affected.
    pub fn updates_for(&self, id: JobId) -> Vec<(JobStatus, usize)> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(job_id, _, _)| *job_id == id)
            .map(|(_, status, affected)| (*status, *affected))
            .collect()
    }

    pub fn applied_for(&self, id: JobId) -> Vec<JobStatus> {
        self.updates_for(id)
            .into_iter()
            .filter(|(_, affected)| *affected == 1)
            .map(|(status, _)| status)
            .collect()
    }

    pub fn keep_on_track_calls(&self) -> usize {
        self.keep_on_track_calls.load(Ordering::SeqCst)
    }

    /// Put a job straight into RUNNING, as another node would.
    pub fn insert_running(&self, job: Job) -> Job {
        let job = self.inner.create_job(job).unwrap().unwrap();
        assert_eq!(self.inner.update_job_status(&job, JobStatus::Running).unwrap(), 1);
        self.inner.get_job(job.id()).unwrap().unwrap()
    }
}

impl JobStore for RecordingStore {
    fn create_job(&self, job: Job) -> SchedulerResult<Option<Job>> {
        self.inner.create_job(job)
    }

    fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>> {
        self.inner.get_job(job_id)
    }

    fn get_running_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        self.inner.get_running_job(target, job_type)
    }

    fn get_latest_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        self.inner.get_latest_job(target, job_type)
    }

    fn update_job_status(&self, job: &Job, status: JobStatus) -> SchedulerResult<usize> {
        let affected = self.inner.update_job_status(job, status)?;
        self.updates.lock().unwrap().push((job.id(), status, affected));
        Ok(affected)
    }

    fn handle_legacy_jobs(&self, max_running_time: Duration) -> SchedulerResult<usize> {
        self.inner.handle_legacy_jobs(max_running_time)
    }

    fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>> {
        self.inner.current_timestamp()
    }

    fn cancel_jobs(&self, stripe: &str) -> SchedulerResult<Vec<JobId>> {
        self.inner.cancel_jobs(stripe)
    }

    fn keep_on_track_jobs(&self, job_ids: &[JobId]) -> SchedulerResult<()> {
        self.keep_on_track_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.keep_on_track_jobs(job_ids)
    }
}

/// Store stub whose updates affect one row the first time a given
/// (job, status) pair is written and none afterwards.
#[derive(Default)]
pub struct AffectOnceStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    applied: Mutex<HashSet<(JobId, JobStatus)>>,
    update_calls: AtomicUsize,
}

impl AffectOnceStore {
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

impl JobStore for AffectOnceStore {
    fn create_job(&self, job: Job) -> SchedulerResult<Option<Job>> {
        self.jobs.lock().unwrap().insert(job.id(), job.clone());
        Ok(Some(job))
    }

    fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    fn get_running_job(&self, _target: &TargetKey, _job_type: JobType) -> SchedulerResult<Option<Job>> {
        Ok(None)
    }

    fn get_latest_job(&self, _target: &TargetKey, _job_type: JobType) -> SchedulerResult<Option<Job>> {
        Ok(None)
    }

    fn update_job_status(&self, job: &Job, status: JobStatus) -> SchedulerResult<usize> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.applied.lock().unwrap().insert((job.id(), status)) {
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn handle_legacy_jobs(&self, _max_running_time: Duration) -> SchedulerResult<usize> {
        Ok(0)
    }

    fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>> {
        Ok(Utc::now())
    }

    fn cancel_jobs(&self, _stripe: &str) -> SchedulerResult<Vec<JobId>> {
        Ok(Vec::new())
    }

    fn keep_on_track_jobs(&self, _job_ids: &[JobId]) -> SchedulerResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Work
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail,
    Error,
    Panic,
}

/// Work that polls its token until its gate opens, then finishes as scripted.
#[derive(Clone)]
pub struct ScriptedWork {
    outcome: Outcome,
    poll: Duration,
    gate: Arc<AtomicBool>,
    executions: Arc<AtomicUsize>,
    request_cleanups: Arc<AtomicUsize>,
    force_cleanups: Arc<AtomicUsize>,
}

impl ScriptedWork {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            poll: Duration::from_millis(20),
            gate: Arc::new(AtomicBool::new(true)),
            executions: Arc::new(AtomicUsize::new(0)),
            request_cleanups: Arc::new(AtomicUsize::new(0)),
            force_cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Blocks (while polling) until [`ScriptedWork::open`] is called.
    pub fn gated(outcome: Outcome) -> Self {
        let work = Self::new(outcome);
        work.gate.store(false, Ordering::SeqCst);
        work
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    pub fn open(&self) {
        self.gate.store(true, Ordering::SeqCst);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn request_cleanups(&self) -> usize {
        self.request_cleanups.load(Ordering::SeqCst)
    }

    pub fn force_cleanups(&self) -> usize {
        self.force_cleanups.load(Ordering::SeqCst)
    }
}

impl JobWork for ScriptedWork {
    fn execute(&self, job: &Job, token: &CancellationToken<'_>) -> SchedulerResult<JobResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);

        while !self.gate.load(Ordering::SeqCst) {
            if token.should_stop()?.is_some() {
                return Ok(JobResult::cancelled("stopped"));
            }
            thread::sleep(self.poll);
        }

        match self.outcome {
            Outcome::Succeed => Ok(JobResult::succeeded(format!("done {}", job.id()))),
            Outcome::Fail => Ok(JobResult::failed("scripted failure")),
            Outcome::Error => Err(JobError::execution_failed("scripted error")),
            Outcome::Panic => panic!("scripted panic"),
        }
    }

    fn handle_request_for_cancel(&self, _job: &Job) {
        self.request_cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_force_cancelled(&self, _job: &Job) {
        self.force_cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Succeeded(JobId, Option<String>),
    Failed(JobId, Option<String>),
    Cancelled(JobId),
    Exception(JobId, JobErrorKind),
}

/// Forwards every callback invocation to a channel.
pub struct RecordingCallback {
    events: mpsc::Sender<Event>,
    failing_exception_calls: AtomicUsize,
}

impl RecordingCallback {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Event>) {
        Self::failing(0)
    }

    /// The first `calls` invocations of `on_exception` fail.
    pub fn failing(calls: usize) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let callback = Arc::new(Self {
            events: tx,
            failing_exception_calls: AtomicUsize::new(calls),
        });
        (callback, rx)
    }
}

impl JobCallback for RecordingCallback {
    fn on_succeeded(&self, _scheduler: &Scheduler, job: &Job, result: &JobResult) {
        let _ = self.events.send(Event::Succeeded(job.id(), result.result_data.clone()));
    }

    fn on_failed(&self, _scheduler: &Scheduler, job: &Job, result: &JobResult) {
        let _ = self.events.send(Event::Failed(job.id(), result.failure_message.clone()));
    }

    fn on_cancelled(&self, _scheduler: &Scheduler, job: &Job) {
        let _ = self.events.send(Event::Cancelled(job.id()));
    }

    fn on_exception(&self, _scheduler: &Scheduler, job: &Job, cause: &JobError) -> SchedulerResult<()> {
        let _ = self.events.send(Event::Exception(job.id(), cause.kind()));
        let failing = self
            .failing_exception_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(JobError::internal("exception handler failed"));
        }
        Ok(())
    }
}

pub fn next_event(rx: &mpsc::Receiver<Event>) -> Event {
    rx.recv_timeout(WAIT).expect("callback event")
}

/// Assert no callback fires for `quiet`.
pub fn assert_no_event(rx: &mpsc::Receiver<Event>, quiet: Duration) {
    if let Ok(event) = rx.recv_timeout(quiet) {
        panic!("unexpected callback: {event:?}");
    }
}
