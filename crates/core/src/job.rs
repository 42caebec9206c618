//! The job record and its descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::status::JobStatus;

/// Business logic selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ParquetConversion,
    Noop,
    DataInsights,
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            JobType::ParquetConversion => "PARQUET_CONVERSION",
            JobType::Noop => "NOOP",
            JobType::DataInsights => "DATA_INSIGHTS",
        };
        f.write_str(name)
    }
}

/// Scheduling priority. Lower numeric value runs first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub fn value(&self) -> u32 {
        match self {
            JobPriority::High => 1,
            JobPriority::Medium => 10,
            JobPriority::Low => 999,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// The logical resource a job operates on; the dedup/conflict scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    /// Tenant/service partition.
    pub stripe: String,
    pub twopart_name: Option<String>,
    pub object_type: Option<String>,
}

impl TargetKey {
    pub fn new(
        stripe: impl Into<String>,
        twopart_name: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            stripe: stripe.into(),
            twopart_name: Some(twopart_name.into()),
            object_type: Some(object_type.into()),
        }
    }

    /// A service-wide target with no object descriptor.
    pub fn stripe_only(stripe: impl Into<String>) -> Self {
        Self {
            stripe: stripe.into(),
            twopart_name: None,
            object_type: None,
        }
    }
}

impl core::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.stripe,
            self.twopart_name.as_deref().unwrap_or("-"),
            self.object_type.as_deref().unwrap_or("-")
        )
    }
}

/// A unit of background work and its lifecycle state.
///
/// Status changes are applied through [`Job::apply_status`], which storage
/// adapters and the scheduler call once a transition has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    #[serde(flatten)]
    target: TargetKey,
    object_name: Option<String>,
    namespace: Option<String>,
    job_type: JobType,
    priority: JobPriority,
    status: JobStatus,
    request_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_ping_time: Option<DateTime<Utc>>,
    job_detail: Option<String>,
}

impl Job {
    /// Create a NOT_STARTED job with MEDIUM priority.
    pub fn new(target: TargetKey, job_type: JobType) -> Self {
        Self {
            id: JobId::new(),
            target,
            object_name: None,
            namespace: None,
            job_type,
            priority: JobPriority::default(),
            status: JobStatus::NotStarted,
            request_time: None,
            start_time: None,
            end_time: None,
            last_ping_time: None,
            job_detail: None,
        }
    }

    /// A no-op job; runs at LOW priority.
    pub fn noop(target: TargetKey) -> Self {
        Self::new(target, JobType::Noop).with_priority(JobPriority::Low)
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_object_name(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.job_detail = Some(detail.into());
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn target(&self) -> &TargetKey {
        &self.target
    }

    pub fn stripe(&self) -> &str {
        &self.target.stripe
    }

    pub fn object_name(&self) -> Option<&str> {
        self.object_name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn request_time(&self) -> Option<DateTime<Utc>> {
        self.request_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn last_ping_time(&self) -> Option<DateTime<Utc>> {
        self.last_ping_time
    }

    pub fn job_detail(&self) -> Option<&str> {
        self.job_detail.as_deref()
    }

    /// Record the status a storage adapter has accepted, with its timestamps.
    ///
    /// Only storage adapters and the scheduler call this, after the store has
    /// accepted the transition. Everyone else changes status through
    /// `Scheduler::update_job_status`.
    #[doc(hidden)]
    pub fn apply_status(&mut self, status: JobStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            JobStatus::Running => {
                self.start_time = Some(at);
                self.last_ping_time = Some(at);
            }
            s if s.is_terminal() => self.end_time = Some(at),
            _ => {}
        }
    }

    /// Stamp the request time on creation.
    pub fn mark_requested(&mut self, at: DateTime<Utc>) {
        self.request_time = Some(at);
    }

    /// Refresh the liveness timestamp.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_ping_time = Some(at);
    }

    pub fn set_detail(&mut self, detail: impl Into<String>) {
        self.job_detail = Some(detail.into());
    }

    /// REQUEST_FOR_CANCEL, CANCELLED, FAILED or ERROR.
    pub fn has_failed(&self) -> bool {
        matches!(
            self.status,
            JobStatus::RequestForCancel | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Error
        )
    }

    /// NOT_STARTED or RUNNING.
    pub fn is_pending(&self) -> bool {
        matches!(self.status, JobStatus::NotStarted | JobStatus::Running)
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_waiting(&self) -> bool {
        self.status == JobStatus::NotStarted
    }

    pub fn has_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Jobs are identified by id alone.
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl core::hash::Hash for Job {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Display for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Job: id={}, target={}, type={}, priority={}, status={}]",
            self.id,
            self.target,
            self.job_type,
            self.priority.value(),
            self.status
        )
    }
}
