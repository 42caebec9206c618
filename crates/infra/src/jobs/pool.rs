//! Bounded worker pool draining a priority-ordered ready queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Why the pool refused an item.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Shutdown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Queued<T> {
    priority: u32,
    seq: u64,
    item: T,
}

// BinaryHeap is a max-heap: the "greatest" entry is the lowest priority value,
// then the earliest arrival.
impl<T> Ord for Queued<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Queued<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Queued<T> {}

struct PoolState<T> {
    queue: BinaryHeap<Queued<T>>,
    next_seq: u64,
    live: usize,
    idle: usize,
    spawned: usize,
    shutdown: bool,
}

struct PoolShared<T> {
    name: String,
    core_size: usize,
    max_size: usize,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    terminated: Condvar,
    handler: Box<dyn Fn(T) + Send + Sync>,
}

impl<T> PoolShared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity thread pool.
///
/// - Items run in ascending `priority` order; equal priorities run in arrival order
/// - Up to `core_size` threads stay alive while the pool is open
/// - Extra threads (up to `max_size`) are started when the queue outgrows the idle
///   workers, and retire as soon as the queue is empty
/// - `shutdown` stops intake and lets queued items drain; `shutdown_now` also drops
///   whatever is still queued
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(name: impl Into<String>, core_size: usize, max_size: usize, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let core_size = core_size.max(1);
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                core_size,
                max_size: max_size.max(core_size),
                state: Mutex::new(PoolState {
                    queue: BinaryHeap::new(),
                    next_seq: 0,
                    live: 0,
                    idle: 0,
                    spawned: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                terminated: Condvar::new(),
                handler: Box::new(handler),
            }),
        }
    }

    /// Queue an item for execution.
    pub fn execute(&self, priority: u32, item: T) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(PoolError::Shutdown);
        }

        let waiting = state.queue.len() + 1;
        if waiting > state.idle && state.live < self.shared.max_size {
            let core = state.live < self.shared.core_size;
            if let Err(e) = spawn_worker(&self.shared, &mut state, core) {
                if state.live == 0 {
                    return Err(PoolError::Spawn(e));
                }
                warn!(pool = %self.shared.name, error = %e, "could not grow worker pool");
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Queued { priority, seq, item });
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of items waiting for a worker.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn live_threads(&self) -> usize {
        self.shared.lock().live
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Stop accepting items; queued items still run.
    pub fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.available.notify_all();
    }

    /// Stop accepting items and drop the queue. Returns the items that never ran.
    ///
    /// Items already executing are not interrupted.
    pub fn shutdown_now(&self) -> Vec<T> {
        let mut state = self.shared.lock();
        state.shutdown = true;
        let mut dropped = Vec::with_capacity(state.queue.len());
        while let Some(q) = state.queue.pop() {
            dropped.push(q.item);
        }
        drop(state);

        self.shared.available.notify_all();
        dropped
    }

    /// Wait up to `timeout` for every worker thread to exit after a shutdown.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .terminated
            .wait_timeout_while(state, timeout, |s| !(s.shutdown && s.live == 0))
            .unwrap_or_else(PoisonError::into_inner);
        state.shutdown && state.live == 0
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker<T: Send + 'static>(
    shared: &Arc<PoolShared<T>>,
    state: &mut PoolState<T>,
    core: bool,
) -> std::io::Result<()> {
    state.spawned += 1;
    let thread_name = format!("{}[{}]", shared.name, state.spawned);
    let worker_shared = Arc::clone(shared);

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || worker_loop(worker_shared, core))?;

    state.live += 1;
    Ok(())
}

fn worker_loop<T: Send + 'static>(shared: Arc<PoolShared<T>>, core: bool) {
    debug!(pool = %shared.name, core, "worker started");

    loop {
        let next = {
            let mut state = shared.lock();
            loop {
                if let Some(queued) = state.queue.pop() {
                    break Some(queued.item);
                }
                if state.shutdown || !core {
                    break None;
                }
                state.idle += 1;
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                state.idle -= 1;
            }
        };

        let Some(item) = next else { break };

        if panic::catch_unwind(AssertUnwindSafe(|| (shared.handler)(item))).is_err() {
            error!(pool = %shared.name, "worker task panicked");
        }
    }

    let mut state = shared.lock();
    state.live -= 1;
    let last = state.live == 0;
    drop(state);
    if last {
        shared.terminated.notify_all();
    }

    debug!(pool = %shared.name, "worker stopped");
}
