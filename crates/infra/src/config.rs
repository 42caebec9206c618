//! Scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use jobkeeper_core::{JobError, SchedulerResult};

/// Default admission-control threshold on the ready queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 500;

/// Default keep-on-track period for running jobs.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay before re-attempting a job whose target is busy.
pub const DEFAULT_CONFLICT_BACKOFF: Duration = Duration::from_secs(10);

/// Runtime configuration of a [`Scheduler`](crate::jobs::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads kept alive for the lifetime of the scheduler
    pub core_pool_size: usize,
    /// Upper bound on concurrently executing submission steps
    pub max_pool_size: usize,
    /// Submissions are rejected once the ready queue holds this many steps
    pub max_queue_size: usize,
    /// How often running jobs get their liveness timestamp refreshed
    pub heartbeat_interval: Duration,
    /// Delay before retrying a job whose target has a running job
    pub conflict_backoff: Duration,
    /// Graceful-stop polling interval
    pub shutdown_poll_interval: Duration,
    /// Graceful-stop polling count before forcing shutdown
    pub shutdown_poll_attempts: u32,
    /// Worker threads are named `prefix[n]`
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size: 8,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            conflict_backoff: DEFAULT_CONFLICT_BACKOFF,
            shutdown_poll_interval: Duration::from_secs(1),
            shutdown_poll_attempts: 5,
            thread_name_prefix: "job-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_pool_size(mut self, core: usize, max: usize) -> Self {
        self.core_pool_size = core;
        self.max_pool_size = max;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    pub fn with_shutdown_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.shutdown_poll_interval = interval;
        self.shutdown_poll_attempts = attempts;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Overlay `JOBKEEPER_*` environment variables onto the defaults.
    ///
    /// - `JOBKEEPER_CORE_POOL_SIZE`
    /// - `JOBKEEPER_MAX_POOL_SIZE`
    /// - `JOBKEEPER_MAX_QUEUE_SIZE`
    /// - `JOBKEEPER_HEARTBEAT_SECS`
    /// - `JOBKEEPER_CONFLICT_BACKOFF_SECS`
    pub fn from_env() -> SchedulerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SchedulerResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "JOBKEEPER_CORE_POOL_SIZE")? {
            config.core_pool_size = v;
        }
        if let Some(v) = parse_var(&lookup, "JOBKEEPER_MAX_POOL_SIZE")? {
            config.max_pool_size = v;
        }
        if let Some(v) = parse_var(&lookup, "JOBKEEPER_MAX_QUEUE_SIZE")? {
            config.max_queue_size = v;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "JOBKEEPER_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "JOBKEEPER_CONFLICT_BACKOFF_SECS")? {
            config.conflict_backoff = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.core_pool_size == 0 {
            return Err(JobError::invalid_input("core_pool_size must be at least 1"));
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(JobError::invalid_input(format!(
                "max_pool_size ({}) must not be below core_pool_size ({})",
                self.max_pool_size, self.core_pool_size
            )));
        }
        if self.max_queue_size == 0 {
            return Err(JobError::invalid_input("max_queue_size must be at least 1"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(JobError::invalid_input("heartbeat_interval must be positive"));
        }
        if self.shutdown_poll_interval.is_zero() {
            return Err(JobError::invalid_input("shutdown_poll_interval must be positive"));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> SchedulerResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| JobError::invalid_input(format!("{key}={raw:?} is not valid")).with_source(e)),
    }
}
