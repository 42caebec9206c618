use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jobkeeper_core::{JobError, JobType, SchedulerResult};

use super::noop::NoOpWork;
use super::processor::{ExecutionTemplate, JobProcessor, JobWork};
use super::scheduler::Scheduler;

/// Builds a fresh processor for one job.
pub type ProcessorFactory = Arc<dyn Fn(&Scheduler) -> Box<dyn JobProcessor> + Send + Sync>;

/// Maps each [`JobType`] to the factory for its processor.
///
/// Built once before the scheduler starts; read-only afterwards.
#[derive(Clone)]
pub struct ProcessorRegistry {
    factories: HashMap<JobType, ProcessorFactory>,
}

impl ProcessorRegistry {
    /// A registry that supports no job type at all.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a processor factory for a job type, replacing any previous one.
    pub fn register<F>(&mut self, job_type: JobType, factory: F)
    where
        F: Fn(&Scheduler) -> Box<dyn JobProcessor> + Send + Sync + 'static,
    {
        self.factories.insert(job_type, Arc::new(factory));
    }

    /// Register business logic that runs inside the standard [`ExecutionTemplate`].
    pub fn register_work<W>(&mut self, job_type: JobType, work: W)
    where
        W: JobWork + Clone + 'static,
    {
        self.register(job_type, move |scheduler| {
            Box::new(ExecutionTemplate::new(scheduler.clone(), work.clone()))
        });
    }

    pub fn with_work<W>(mut self, job_type: JobType, work: W) -> Self
    where
        W: JobWork + Clone + 'static,
    {
        self.register_work(job_type, work);
        self
    }

    pub fn supports(&self, job_type: JobType) -> bool {
        self.factories.contains_key(&job_type)
    }

    /// Instantiate the processor for `job_type`.
    pub fn create(&self, scheduler: &Scheduler, job_type: JobType) -> SchedulerResult<Box<dyn JobProcessor>> {
        let factory = self.factories.get(&job_type).ok_or_else(|| {
            JobError::job_type_not_supported(format!("no processor registered for job type {job_type}"))
        })?;
        Ok(factory(scheduler))
    }
}

/// Registers the built-in no-op processor.
impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::empty().with_work(JobType::Noop, NoOpWork::default())
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.factories.keys().map(ToString::to_string).collect();
        types.sort();
        f.debug_struct("ProcessorRegistry").field("job_types", &types).finish()
    }
}
