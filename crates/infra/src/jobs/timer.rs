//! Single-threaded delay timer for deferred re-submissions.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

struct Delayed<T> {
    due: Instant,
    seq: u64,
    item: T,
}

// Earliest deadline first.
impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

struct TimerState<T> {
    entries: BinaryHeap<Delayed<T>>,
    next_seq: u64,
    cancelled: bool,
}

struct TimerShared<T> {
    state: Mutex<TimerState<T>>,
    wake: Condvar,
}

impl<T> TimerShared<T> {
    fn lock(&self) -> MutexGuard<'_, TimerState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The timer was cancelled; nothing more can be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delay timer cancelled")]
pub struct TimerCancelled;

/// Fires each scheduled item on one background thread once its delay elapses.
///
/// The fire callback should only hand the item off (e.g. enqueue it on a worker
/// pool); every item shares this one thread.
pub struct DelayTimer<T: Send + 'static> {
    shared: Arc<TimerShared<T>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<T: Send + 'static> DelayTimer<T> {
    pub fn start<F>(name: impl Into<String>, fire: F) -> std::io::Result<Self>
    where
        F: Fn(T) + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                cancelled: false,
            }),
            wake: Condvar::new(),
        });

        let name = name.into();
        let thread_shared = Arc::clone(&shared);
        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || timer_loop(thread_name, thread_shared, fire))?;

        Ok(Self {
            shared,
            join: Mutex::new(Some(join)),
        })
    }

    /// Fire `item` after `delay`.
    pub fn schedule(&self, delay: Duration, item: T) -> Result<(), TimerCancelled> {
        let mut state = self.shared.lock();
        if state.cancelled {
            return Err(TimerCancelled);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Delayed {
            due: Instant::now() + delay,
            seq,
            item,
        });
        drop(state);

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Items scheduled but not yet fired.
    pub fn pending(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    /// Discard pending items and stop the timer thread. Idempotent.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.lock();
            state.cancelled = true;
            state.entries.clear();
        }
        self.shared.wake.notify_all();

        let join = self.join.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(join) = join {
            // A fire callback may end up cancelling its own timer.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

impl<T: Send + 'static> Drop for DelayTimer<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn timer_loop<T, F>(name: String, shared: Arc<TimerShared<T>>, fire: F)
where
    T: Send + 'static,
    F: Fn(T),
{
    debug!(timer = %name, "delay timer started");

    let mut state = shared.lock();
    loop {
        if state.cancelled {
            break;
        }

        let now = Instant::now();
        let next_due = state.entries.peek().map(|e| e.due);
        match next_due {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            Some(due) if due <= now => {
                let Some(entry) = state.entries.pop() else { continue };
                drop(state);
                if panic::catch_unwind(AssertUnwindSafe(|| fire(entry.item))).is_err() {
                    error!(timer = %name, "delay timer callback panicked");
                }
                state = shared.lock();
            }
            Some(due) => {
                state = shared
                    .wake
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }

    debug!(timer = %name, "delay timer stopped");
}
