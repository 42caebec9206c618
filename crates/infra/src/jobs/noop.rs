use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use jobkeeper_core::{Job, JobResult, SchedulerResult};

use super::processor::{CancellationToken, JobWork};

/// Built-in work for [`JobType::Noop`](jobkeeper_core::JobType::Noop) jobs.
///
/// Waits, then polls for cancellation a few times before succeeding. Useful for
/// exercising the scheduler end to end.
#[derive(Debug, Clone)]
pub struct NoOpWork {
    warmup: Duration,
    polls: u32,
    poll_interval: Duration,
    cleanup: Duration,
}

impl Default for NoOpWork {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(5),
            polls: 5,
            poll_interval: Duration::from_millis(200),
            cleanup: Duration::from_secs(1),
        }
    }
}

impl NoOpWork {
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_polls(mut self, polls: u32, interval: Duration) -> Self {
        self.polls = polls;
        self.poll_interval = interval;
        self
    }

    pub fn with_cleanup(mut self, cleanup: Duration) -> Self {
        self.cleanup = cleanup;
        self
    }
}

impl JobWork for NoOpWork {
    fn execute(&self, job: &Job, token: &CancellationToken<'_>) -> SchedulerResult<JobResult> {
        info!(job_id = %job.id(), target = %job.target(), "no-op job started");

        if token.pause(self.warmup, self.poll_interval)?.is_some() {
            return Ok(JobResult::cancelled("Job cancelled"));
        }

        for poll in 0..self.polls {
            if let Some(reason) = token.should_stop()? {
                debug!(job_id = %job.id(), poll, ?reason, "no-op job stopping");
                return Ok(JobResult::cancelled("Job cancelled"));
            }
            thread::sleep(self.poll_interval);
        }

        let summary = serde_json::json!({
            "job_id": job.id().to_string(),
            "stripe": job.stripe(),
            "polls": self.polls,
        });
        Ok(JobResult::succeeded(summary.to_string()))
    }

    fn handle_request_for_cancel(&self, job: &Job) {
        debug!(job_id = %job.id(), "no-op cleanup after cancel request");
        thread::sleep(self.cleanup);
    }

    fn handle_force_cancelled(&self, job: &Job) {
        debug!(job_id = %job.id(), "no-op cleanup after forced cancel");
        thread::sleep(self.cleanup);
    }
}
