//! End-to-end submission protocol: dispatch, conflict backoff, supersession,
//! admission control, failure delivery and shutdown.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jobkeeper_core::{Job, JobErrorKind, JobPriority, JobResult, JobStatus, JobType, SchedulerResult};
use jobkeeper_infra::jobs::{CancellationToken, JobStore, JobWork, ProcessorRegistry, Scheduler};

use common::*;

fn scheduler_with(store: Arc<dyn JobStore>, work: &ScriptedWork, config: jobkeeper_infra::SchedulerConfig) -> Scheduler {
    let processors = ProcessorRegistry::empty().with_work(JobType::Noop, work.clone());
    Scheduler::with_processors(config, store, processors).unwrap()
}

#[test]
fn repeated_status_update_is_not_applied_twice() {
    let store = Arc::new(AffectOnceStore::default());
    let scheduler = Scheduler::start(quick_config(), store.clone()).unwrap();
    let mut job = store.create_job(Job::noop(target("orders"))).unwrap().unwrap();

    assert!(scheduler.update_job_status(&mut job, JobStatus::Running).unwrap());
    let started = job.start_time();
    assert_eq!(scheduler.running_job_ids(), vec![job.id()]);

    assert!(!scheduler.update_job_status(&mut job, JobStatus::Running).unwrap());
    assert_eq!(job.start_time(), started);
    assert_eq!(scheduler.running_job_ids(), vec![job.id()]);

    assert!(scheduler.update_job_status(&mut job, JobStatus::Succeeded).unwrap());
    assert!(scheduler.running_job_ids().is_empty());
    assert!(!scheduler.update_job_status(&mut job, JobStatus::Succeeded).unwrap());
    assert!(scheduler.running_job_ids().is_empty());

    assert_eq!(store.update_calls(), 4);
    scheduler.stop();
}

#[test]
fn unopposed_job_runs_to_success() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Succeed);
    let scheduler = scheduler_with(store.clone(), &work, quick_config());
    let (callback, events) = RecordingCallback::new();

    let job = Job::noop(target("orders")).with_priority(JobPriority::Medium);
    let id = job.id();
    scheduler.submit(job, callback).unwrap();

    assert_eq!(next_event(&events), Event::Succeeded(id, Some(format!("done {id}"))));
    assert_no_event(&events, Duration::from_millis(200));

    assert_eq!(status_of(store.as_ref(), id), JobStatus::Succeeded);
    let expected = format!("done {id}");
    assert_eq!(store.get_job(id).unwrap().unwrap().job_detail(), Some(expected.as_str()));
    assert_eq!(store.applied_for(id), vec![JobStatus::Running, JobStatus::Succeeded]);
    assert!(!scheduler.running_job_ids().contains(&id));
    assert_eq!(work.executions(), 1);
    scheduler.stop();
}

#[test]
fn busy_target_gets_cancel_request_and_retry_after_backoff() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Succeed);
    let scheduler = scheduler_with(store.clone(), &work, quick_config());
    let (callback, events) = RecordingCallback::new();

    let running = store.insert_running(Job::noop(target("orders")));
    let newer = Job::noop(target("orders"));
    let newer_id = newer.id();
    scheduler.submit(newer, callback).unwrap();

    assert!(wait_until(WAIT, || status_of(store.as_ref(), running.id()) == JobStatus::RequestForCancel));

    // Long enough for at least one retry against the still-busy target.
    thread::sleep(BACKOFF * 2);
    assert_eq!(work.executions(), 0);
    assert_eq!(status_of(store.as_ref(), newer_id), JobStatus::NotStarted);
    assert!(store.updates_for(newer_id).is_empty());
    assert_eq!(store.updates_for(running.id()), vec![(JobStatus::RequestForCancel, 1)]);

    // The other node finishes cancelling; the next attempt runs.
    assert_eq!(store.inner().update_job_status(&running, JobStatus::Cancelled).unwrap(), 1);
    assert_eq!(next_event(&events), Event::Succeeded(newer_id, Some(format!("done {newer_id}"))));

    let finished = store.get_job(newer_id).unwrap().unwrap();
    let waited = (finished.start_time().unwrap() - finished.request_time().unwrap())
        .to_std()
        .unwrap();
    assert!(waited >= BACKOFF, "started after {waited:?}");
    assert_eq!(store.updates_for(running.id()), vec![(JobStatus::RequestForCancel, 1)]);
    scheduler.stop();
}

#[test]
fn superseded_job_is_abandoned() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::gated(Outcome::Succeed);
    let config = quick_config().with_pool_size(1, 1);
    let scheduler = scheduler_with(store.clone(), &work, config);
    let (callback, events) = RecordingCallback::new();

    let blocker = Job::noop(target("blocker"));
    let blocker_id = blocker.id();
    scheduler.submit(blocker, callback.clone()).unwrap();
    assert!(wait_until(WAIT, || status_of(store.as_ref(), blocker_id) == JobStatus::Running));

    let older = Job::noop(target("orders"));
    let older_id = older.id();
    let newer = Job::noop(target("orders"));
    let newer_id = newer.id();
    scheduler.submit(older, callback.clone()).unwrap();
    scheduler.submit(newer, callback).unwrap();
    work.open();

    let mut finished = vec![next_event(&events), next_event(&events)];
    finished.sort_by_key(|e| format!("{e:?}"));
    let mut expected = vec![
        Event::Succeeded(blocker_id, Some(format!("done {blocker_id}"))),
        Event::Succeeded(newer_id, Some(format!("done {newer_id}"))),
    ];
    expected.sort_by_key(|e| format!("{e:?}"));
    assert_eq!(finished, expected);

    assert_no_event(&events, Duration::from_millis(200));
    assert_eq!(status_of(store.as_ref(), older_id), JobStatus::NotStarted);
    assert!(store.updates_for(older_id).is_empty());
    scheduler.stop();
}

#[test]
fn full_queue_rejects_after_persisting() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::gated(Outcome::Succeed);
    let config = quick_config().with_pool_size(1, 1).with_max_queue_size(1);
    let scheduler = scheduler_with(store.clone(), &work, config);
    let (callback, events) = RecordingCallback::new();

    let first = Job::noop(target("a"));
    let first_id = first.id();
    scheduler.submit(first, callback.clone()).unwrap();
    assert!(wait_until(WAIT, || status_of(store.as_ref(), first_id) == JobStatus::Running));

    let second = Job::noop(target("b"));
    let second_id = second.id();
    scheduler.submit(second, callback.clone()).unwrap();
    assert_eq!(scheduler.queue_depth(), 1);

    let third = Job::noop(target("c"));
    let third_id = third.id();
    let err = scheduler.submit(third, callback).unwrap_err();
    assert_eq!(err.kind(), JobErrorKind::JobRejected);
    assert_eq!(status_of(store.as_ref(), third_id), JobStatus::NotStarted);

    work.open();
    let done: Vec<Event> = vec![next_event(&events), next_event(&events)];
    assert_eq!(
        done,
        vec![
            Event::Succeeded(first_id, Some(format!("done {first_id}"))),
            Event::Succeeded(second_id, Some(format!("done {second_id}"))),
        ]
    );
    assert_no_event(&events, Duration::from_millis(200));
    assert!(store.updates_for(third_id).is_empty());
    scheduler.stop();
}

#[test]
fn business_failure_is_recorded_as_failed() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Fail);
    let scheduler = scheduler_with(store.clone(), &work, quick_config());
    let (callback, events) = RecordingCallback::new();

    let job = Job::noop(target("orders"));
    let id = job.id();
    scheduler.submit(job, callback).unwrap();

    assert_eq!(next_event(&events), Event::Failed(id, Some("scripted failure".to_string())));
    assert_eq!(status_of(store.as_ref(), id), JobStatus::Failed);
    assert_eq!(store.get_job(id).unwrap().unwrap().job_detail(), Some("scripted failure"));
    assert!(scheduler.running_job_ids().is_empty());
    scheduler.stop();
}

/// Work whose job is swept to CANCELLED by another writer just before it
/// reports success.
#[derive(Clone)]
struct SweptWhileFinishing {
    store: Arc<RecordingStore>,
}

impl JobWork for SweptWhileFinishing {
    fn execute(&self, job: &Job, _token: &CancellationToken<'_>) -> SchedulerResult<JobResult> {
        let current = self.store.get_job(job.id())?.expect("job stored");
        assert_eq!(self.store.inner().update_job_status(&current, JobStatus::Cancelled)?, 1);
        Ok(JobResult::succeeded("late"))
    }

    fn handle_request_for_cancel(&self, _job: &Job) {}

    fn handle_force_cancelled(&self, _job: &Job) {}
}

#[test]
fn rejected_final_status_still_reaches_the_callback() {
    let store = RecordingStore::arc();
    let processors = ProcessorRegistry::empty().with_work(JobType::Noop, SweptWhileFinishing { store: store.clone() });
    let scheduler = Scheduler::with_processors(quick_config(), store.clone(), processors).unwrap();
    let (callback, events) = RecordingCallback::new();

    let job = Job::noop(target("orders"));
    let id = job.id();
    scheduler.submit(job, callback).unwrap();

    assert_eq!(next_event(&events), Event::Succeeded(id, Some("late".to_string())));
    assert_no_event(&events, Duration::from_millis(200));

    // The sweep's CANCELLED stands; the SUCCEEDED write affected nothing.
    assert_eq!(status_of(store.as_ref(), id), JobStatus::Cancelled);
    assert_eq!(
        store.updates_for(id),
        vec![(JobStatus::Running, 1), (JobStatus::Succeeded, 0)]
    );
    assert!(scheduler.running_job_ids().is_empty());
    scheduler.stop();
}

#[test]
fn unsupported_job_type_ends_in_error() {
    let store = RecordingStore::arc();
    let scheduler = Scheduler::start(quick_config(), store.clone()).unwrap();
    let (callback, events) = RecordingCallback::new();

    let job = Job::new(target("orders"), JobType::ParquetConversion);
    let id = job.id();
    scheduler.submit(job, callback).unwrap();

    assert_eq!(next_event(&events), Event::Exception(id, JobErrorKind::JobTypeNotSupported));
    assert_no_event(&events, Duration::from_millis(200));
    assert_eq!(status_of(store.as_ref(), id), JobStatus::Error);
    scheduler.stop();
}

#[test]
fn failing_exception_handler_is_called_once_more() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Error);
    let scheduler = scheduler_with(store.clone(), &work, quick_config());
    let (callback, events) = RecordingCallback::failing(2);

    let job = Job::noop(target("orders"));
    let id = job.id();
    scheduler.submit(job, callback).unwrap();

    assert_eq!(next_event(&events), Event::Exception(id, JobErrorKind::JobExecutionFailed));
    assert_eq!(next_event(&events), Event::Exception(id, JobErrorKind::InternalError));
    assert_no_event(&events, Duration::from_millis(300));
    assert_eq!(status_of(store.as_ref(), id), JobStatus::Error);
    assert!(scheduler.running_job_ids().is_empty());
    scheduler.stop();
}

#[test]
fn panicking_work_is_reported_and_the_worker_survives() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Panic);
    let config = quick_config().with_pool_size(1, 1);
    let scheduler = scheduler_with(store.clone(), &work, config);
    let (callback, events) = RecordingCallback::new();

    let first = Job::noop(target("a"));
    let first_id = first.id();
    let second = Job::noop(target("b"));
    let second_id = second.id();
    scheduler.submit(first, callback.clone()).unwrap();
    scheduler.submit(second, callback).unwrap();

    assert_eq!(next_event(&events), Event::Exception(first_id, JobErrorKind::JobExecutionFailed));
    assert_eq!(next_event(&events), Event::Exception(second_id, JobErrorKind::JobExecutionFailed));
    assert_eq!(status_of(store.as_ref(), first_id), JobStatus::Error);
    assert_eq!(status_of(store.as_ref(), second_id), JobStatus::Error);
    scheduler.stop();
}

#[test]
fn scheduled_job_waits_for_its_delay() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Succeed);
    let scheduler = scheduler_with(store.clone(), &work, quick_config());
    let (callback, events) = RecordingCallback::new();

    let job = store.create_job(Job::noop(target("orders"))).unwrap().unwrap();
    let id = job.id();
    let delay = Duration::from_millis(250);
    let scheduled_at = Instant::now();
    scheduler.schedule_job(job, delay, callback).unwrap();

    assert_eq!(next_event(&events), Event::Succeeded(id, Some(format!("done {id}"))));
    assert!(scheduled_at.elapsed() >= delay);
    scheduler.stop();
}

#[test]
fn concurrent_submissions_converge_on_the_latest_job() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::new(Outcome::Succeed);
    let config = quick_config().with_pool_size(4, 4).with_conflict_backoff(Duration::from_millis(50));
    let scheduler = scheduler_with(store.clone(), &work, config);
    let (callback, _events) = RecordingCallback::new();
    let orders = target("orders");

    let submitters: Vec<_> = (0..5)
        .map(|_| {
            let scheduler = scheduler.clone();
            let callback = callback.clone();
            let orders = orders.clone();
            thread::spawn(move || scheduler.submit(Job::noop(orders), callback).unwrap())
        })
        .collect();
    for handle in submitters {
        handle.join().unwrap();
    }

    let latest = store.get_latest_job(&orders, JobType::Noop).unwrap().unwrap();
    assert!(wait_until(WAIT, || status_of(store.as_ref(), latest.id()) == JobStatus::Succeeded));
    assert!(wait_until(WAIT, || {
        store
            .inner()
            .jobs_for_target(&orders, JobType::Noop)
            .unwrap()
            .iter()
            .all(|job| !job.status().is_active())
    }));
    scheduler.stop();
}

#[test]
fn stop_gives_up_on_stuck_work_without_reporting_it() {
    let store = RecordingStore::arc();
    let work = ScriptedWork::gated(Outcome::Succeed);
    let config = quick_config().with_pool_size(1, 1);
    let scheduler = scheduler_with(store.clone(), &work, config);
    let (callback, events) = RecordingCallback::new();

    let stuck = Job::noop(target("a"));
    let stuck_id = stuck.id();
    scheduler.submit(stuck, callback.clone()).unwrap();
    assert!(wait_until(WAIT, || status_of(store.as_ref(), stuck_id) == JobStatus::Running));

    let queued = Job::noop(target("b"));
    let queued_id = queued.id();
    scheduler.submit(queued, callback.clone()).unwrap();

    scheduler.stop();
    assert!(scheduler.is_shutdown());
    assert!(scheduler.is_interrupted());
    assert_eq!(scheduler.queue_depth(), 0);

    // The running job sees the interruption at its next checkpoint; nothing is reported.
    assert_no_event(&events, Duration::from_millis(300));
    assert_eq!(status_of(store.as_ref(), stuck_id), JobStatus::Running);
    assert_eq!(status_of(store.as_ref(), queued_id), JobStatus::NotStarted);

    // Stopped schedulers ignore new work.
    scheduler.stop();
    let late = Job::noop(target("c"));
    let late_id = late.id();
    scheduler.submit(late, callback).unwrap();
    assert!(store.get_job(late_id).unwrap().is_none());
}
