//! Job storage port and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use jobkeeper_core::{
    Job, JobError, JobId, JobStatus, JobType, SchedulerResult, TargetKey,
};

/// Terminal jobs older than this are deleted by the legacy sweep.
pub const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Persistence boundary of the scheduler.
///
/// The persisted status is the source of truth. Implementations may be shared
/// by several scheduler processes; status updates must be conditional so that
/// concurrent writers are detected through the affected-row count.
pub trait JobStore: Send + Sync {
    /// Persist a new job. `None` means the backend produced no record.
    fn create_job(&self, job: Job) -> SchedulerResult<Option<Job>>;

    /// Get a job by ID.
    fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>>;

    /// The job in RUNNING or REQUEST_FOR_CANCEL for a target, if any.
    fn get_running_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>>;

    /// The most recently created job for a target.
    fn get_latest_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>>;

    /// Apply a status transition. Returns the number of records changed;
    /// anything other than 1 means the transition was not applied.
    ///
    /// A terminal transition also stores `job.job_detail()`, which carries the
    /// result data or failure message of the run.
    fn update_job_status(&self, job: &Job, status: JobStatus) -> SchedulerResult<usize>;

    /// Force abandoned jobs to CANCELLED and delete old finished ones.
    /// Returns the number of deleted jobs.
    fn handle_legacy_jobs(&self, max_running_time: Duration) -> SchedulerResult<usize>;

    /// The backend's clock.
    fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>>;

    /// Cancel every unfinished job of a stripe, returning their ids.
    fn cancel_jobs(&self, stripe: &str) -> SchedulerResult<Vec<JobId>>;

    /// Refresh `last_ping_time` for the given jobs.
    fn keep_on_track_jobs(&self, job_ids: &[JobId]) -> SchedulerResult<()>;
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn create_job(&self, job: Job) -> SchedulerResult<Option<Job>> {
        (**self).create_job(job)
    }

    fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>> {
        (**self).get_job(job_id)
    }

    fn get_running_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        (**self).get_running_job(target, job_type)
    }

    fn get_latest_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        (**self).get_latest_job(target, job_type)
    }

    fn update_job_status(&self, job: &Job, status: JobStatus) -> SchedulerResult<usize> {
        (**self).update_job_status(job, status)
    }

    fn handle_legacy_jobs(&self, max_running_time: Duration) -> SchedulerResult<usize> {
        (**self).handle_legacy_jobs(max_running_time)
    }

    fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>> {
        (**self).current_timestamp()
    }

    fn cancel_jobs(&self, stripe: &str) -> SchedulerResult<Vec<JobId>> {
        (**self).cancel_jobs(stripe)
    }

    fn keep_on_track_jobs(&self, job_ids: &[JobId]) -> SchedulerResult<()> {
        (**self).keep_on_track_jobs(job_ids)
    }
}

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    // creation order; "latest" means highest sequence
    seq: u64,
}

#[derive(Debug, Default)]
struct Records {
    jobs: HashMap<JobId, StoredJob>,
    next_seq: u64,
}

impl Records {
    fn for_target<'a>(
        &'a self,
        target: &'a TargetKey,
        job_type: JobType,
    ) -> impl Iterator<Item = &'a StoredJob> + 'a {
        self.jobs
            .values()
            .filter(move |s| s.job.target() == target && s.job.job_type() == job_type)
    }
}

/// In-memory job store for tests/dev.
///
/// Status updates only succeed along the edges of the job state machine, which
/// makes this store behave like a conditional `UPDATE ... WHERE status = ?`.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<Records>,
    clock_offset: RwLock<chrono::Duration>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move this store's clock forward (simulates elapsed time in tests).
    pub fn advance_clock(&self, by: Duration) {
        if let Ok(mut offset) = self.clock_offset.write() {
            *offset += chrono::Duration::from_std(by).unwrap_or_default();
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All jobs of a target, oldest first.
    pub fn jobs_for_target(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Vec<Job>> {
        let records = self.read()?;
        let mut found: Vec<&StoredJob> = records.for_target(target, job_type).collect();
        found.sort_by_key(|s| s.seq);
        Ok(found.into_iter().map(|s| s.job.clone()).collect())
    }

    fn now(&self) -> DateTime<Utc> {
        let offset = self
            .clock_offset
            .read()
            .map(|o| *o)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + offset
    }

    fn read(&self) -> SchedulerResult<std::sync::RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|_| JobError::query_error("job store lock poisoned"))
    }

    fn write(&self) -> SchedulerResult<std::sync::RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|_| JobError::update_failed("job store lock poisoned"))
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, mut job: Job) -> SchedulerResult<Option<Job>> {
        let now = self.now();
        let mut records = self.write()?;
        if records.jobs.contains_key(&job.id()) {
            return Err(JobError::creation_failed(format!("job already exists: {}", job.id())));
        }

        job.mark_requested(now);
        let seq = records.next_seq;
        records.next_seq += 1;
        records.jobs.insert(job.id(), StoredJob { job: job.clone(), seq });
        Ok(Some(job))
    }

    fn get_job(&self, job_id: JobId) -> SchedulerResult<Option<Job>> {
        let records = self.read()?;
        Ok(records.jobs.get(&job_id).map(|s| s.job.clone()))
    }

    fn get_running_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        let records = self.read()?;
        Ok(records
            .for_target(target, job_type)
            .filter(|s| s.job.status().is_active())
            .max_by_key(|s| s.seq)
            .map(|s| s.job.clone()))
    }

    fn get_latest_job(&self, target: &TargetKey, job_type: JobType) -> SchedulerResult<Option<Job>> {
        let records = self.read()?;
        Ok(records
            .for_target(target, job_type)
            .max_by_key(|s| s.seq)
            .map(|s| s.job.clone()))
    }

    fn update_job_status(&self, job: &Job, status: JobStatus) -> SchedulerResult<usize> {
        let now = self.now();
        let mut records = self.write()?;
        let Some(stored) = records.jobs.get_mut(&job.id()) else {
            return Ok(0);
        };

        if !stored.job.status().can_transition_to(status) {
            return Ok(0);
        }

        stored.job.apply_status(status, now);
        if status.is_terminal() {
            if let Some(detail) = job.job_detail() {
                stored.job.set_detail(detail);
            }
        }
        Ok(1)
    }

    fn handle_legacy_jobs(&self, max_running_time: Duration) -> SchedulerResult<usize> {
        let now = self.now();
        let stale_before = now
            - chrono::Duration::from_std(max_running_time)
                .map_err(|e| JobError::clean_job_failed("max running time out of range").with_source(e))?;
        let finished_before = now
            - chrono::Duration::from_std(FINISHED_JOB_RETENTION).unwrap_or_else(|_| chrono::Duration::days(1));

        let mut records = self
            .records
            .write()
            .map_err(|_| JobError::clean_job_failed("job store lock poisoned"))?;

        for stored in records.jobs.values_mut() {
            let job = &mut stored.job;
            if !job.status().is_active() {
                continue;
            }
            let last_seen = job.last_ping_time().or(job.start_time());
            if last_seen.is_some_and(|t| t < stale_before) {
                job.apply_status(JobStatus::Cancelled, now);
            }
        }

        let before = records.jobs.len();
        records.jobs.retain(|_, s| {
            !(s.job.status().is_terminal() && s.job.end_time().is_some_and(|t| t < finished_before))
        });
        Ok(before - records.jobs.len())
    }

    fn current_timestamp(&self) -> SchedulerResult<DateTime<Utc>> {
        Ok(self.now())
    }

    fn cancel_jobs(&self, stripe: &str) -> SchedulerResult<Vec<JobId>> {
        let now = self.now();
        let mut records = self.write()?;
        let mut cancelled = Vec::new();

        for stored in records.jobs.values_mut() {
            let job = &mut stored.job;
            if job.stripe() == stripe && job.status().can_transition_to(JobStatus::Cancelled) {
                job.apply_status(JobStatus::Cancelled, now);
                cancelled.push(job.id());
            }
        }

        Ok(cancelled)
    }

    fn keep_on_track_jobs(&self, job_ids: &[JobId]) -> SchedulerResult<()> {
        let now = self.now();
        let mut records = self.write()?;
        for id in job_ids {
            if let Some(stored) = records.jobs.get_mut(id) {
                if stored.job.status().is_active() {
                    stored.job.touch(now);
                }
            }
        }
        Ok(())
    }
}
