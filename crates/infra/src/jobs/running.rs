use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use jobkeeper_core::JobId;

/// Ids of jobs this process believes are RUNNING or REQUEST_FOR_CANCEL.
///
/// A cache scoping the heartbeat; the store stays authoritative.
#[derive(Debug, Default)]
pub struct RunningSet {
    ids: Mutex<HashSet<JobId>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&self, id: JobId) -> bool {
        self.lock().insert(id)
    }

    pub fn remove(&self, id: &JobId) -> bool {
        self.lock().remove(id)
    }

    pub fn remove_all(&self, ids: &[JobId]) {
        let mut set = self.lock();
        for id in ids {
            set.remove(id);
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().contains(id)
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
