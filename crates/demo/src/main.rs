//! Runs two conflicting no-op jobs on one target and an unrelated one beside
//! them, then prints where every job ended up.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};

use jobkeeper_core::{Job, JobPriority, JobType, TargetKey};
use jobkeeper_infra::{
    InMemoryJobStore, JobStore, LoggingCallback, NoOpWork, ProcessorRegistry, Scheduler, SchedulerConfig,
};

const DEADLINE: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    jobkeeper_observability::init();

    let config = SchedulerConfig::from_env().context("invalid JOBKEEPER_* configuration")?;
    let store = InMemoryJobStore::arc();
    let processors = ProcessorRegistry::empty().with_work(
        JobType::Noop,
        NoOpWork::default()
            .with_warmup(Duration::from_secs(2))
            .with_cleanup(Duration::from_millis(200)),
    );
    let scheduler = Scheduler::with_processors(config, store.clone(), processors)?;
    let callback = Arc::new(LoggingCallback);

    let orders = TargetKey::new("tenant-a", "sales.orders", "table");
    let invoices = TargetKey::new("tenant-a", "sales.invoices", "table");

    let first = Job::noop(orders.clone()).with_object_name("orders");
    let first_id = first.id();
    scheduler.submit(first, callback.clone())?;

    // Let the first job start so the second one has to preempt it.
    thread::sleep(Duration::from_millis(500));
    let second = Job::noop(orders.clone()).with_priority(JobPriority::High);
    let second_id = second.id();
    scheduler.submit(second, callback.clone())?;

    scheduler.submit(Job::noop(invoices.clone()), callback.clone())?;

    let started = Instant::now();
    loop {
        let pending = [&orders, &invoices]
            .into_iter()
            .map(|target| store.jobs_for_target(target, JobType::Noop))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .filter(|job| !job.status().is_terminal())
            .count();
        if pending == 0 {
            break;
        }
        if started.elapsed() > DEADLINE {
            scheduler.stop();
            bail!("{pending} jobs still unfinished after {DEADLINE:?}");
        }
        thread::sleep(Duration::from_millis(250));
    }

    for id in [first_id, second_id] {
        if let Some(job) = store.get_job(id)? {
            tracing::info!(job_id = %job.id(), status = %job.status(), detail = ?job.job_detail(), "final state");
        }
    }

    let summary: Vec<_> = [&orders, &invoices]
        .into_iter()
        .map(|target| store.jobs_for_target(target, JobType::Noop))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .map(|job| serde_json::json!({ "id": job.id().to_string(), "target": job.target().to_string(), "status": job.status().as_str() }))
        .collect();
    tracing::info!(jobs = %serde_json::Value::Array(summary), "demo finished");

    scheduler.stop();
    Ok(())
}
