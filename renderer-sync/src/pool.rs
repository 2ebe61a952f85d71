//! Bounded, dynamically resizable worker-thread pool.

use crate::{Condition, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// A one-shot unit of work.
///
/// Owned by the pool queue until a worker thread picks it up, then by that
/// thread until `process` returns.
pub trait Worker: Send {
    fn process(&mut self);
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Box<dyn Worker>>,
    max_size: usize,
    keep_alive: Duration,
    pool_size: usize,
    waiting: usize,
    stopped: bool,
    suspended: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled when work is queued or workers must re-check their fate.
    queue_fill: Condition,
    /// Signalled by the last worker to leave, for drain-on-drop.
    drained: Condition,
}

/// A set of worker threads consuming tasks from a shared FIFO queue.
///
/// Enqueuing wakes an idle worker when one waits, otherwise spawns a new
/// thread up to the configured maximum. Idle workers retire themselves after
/// the keep-alive interval. The pool may be suspended (queued work is
/// retained but not dequeued), resized at runtime, and dropping it discards
/// queued-but-unstarted tasks, then blocks until every worker has exited.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    max_size,
                    keep_alive: DEFAULT_KEEP_ALIVE,
                    ..PoolState::default()
                }),
                queue_fill: Condition::new(),
                drained: Condition::new(),
            }),
        }
    }

    /// Append a task to the queue. Returns false only when the pool has
    /// been stopped, in which case the task was not taken.
    pub fn enqueue(&self, worker: Box<dyn Worker>) -> bool {
        let mut st = self.shared.state.lock();
        if st.stopped {
            return false;
        }
        st.queue.push_back(worker);
        if !st.suspended {
            if st.waiting > 0 {
                self.shared.queue_fill.signal();
            } else {
                Self::resize(&self.shared, &mut st);
            }
        }
        true
    }

    /// Retarget the pool size. Growing spawns workers for queued work;
    /// shrinking lets supernumerary workers exit after their current task.
    pub fn set_max_size(&self, max_size: usize) {
        let mut st = self.shared.state.lock();
        st.max_size = max_size;
        if !st.suspended {
            Self::resize(&self.shared, &mut st);
        }
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        self.shared.state.lock().keep_alive = keep_alive;
    }

    /// Number of live worker threads.
    pub fn size(&self) -> usize {
        self.shared.state.lock().pool_size
    }

    pub fn max_size(&self) -> usize {
        self.shared.state.lock().max_size
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    /// Pause dequeuing. Idle workers stay parked and are not evicted by the
    /// keep-alive timer while suspended.
    pub fn suspend(&self) {
        self.shared.state.lock().suspended = true;
    }

    pub fn resume(&self) {
        let mut st = self.shared.state.lock();
        st.suspended = false;
        Self::resize(&self.shared, &mut st);
        self.shared.queue_fill.broadcast();
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Reject further enqueues.
    pub fn stop(&self) {
        self.shared.state.lock().stopped = true;
    }

    /// Accept enqueues again.
    pub fn start(&self) {
        self.shared.state.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Spawn or retire workers toward `max_size`. Called with the state
    /// lock held.
    fn resize(shared: &Arc<PoolShared>, st: &mut PoolState) {
        if st.pool_size < st.max_size && !st.queue.is_empty() {
            let want = st.queue.len().min(st.max_size - st.pool_size);
            for _ in 0..want {
                st.pool_size += 1;
                let shared = Arc::clone(shared);
                let spawned = thread::Builder::new()
                    .name("pool-worker".into())
                    .spawn(move || worker_main(shared));
                if let Err(e) = spawned {
                    // The task stays queued; it is picked up if another
                    // worker appears, otherwise it is lost with the pool.
                    st.pool_size -= 1;
                    warn!("worker thread failed to start: {e}");
                }
            }
        } else if st.pool_size > st.max_size {
            // Workers check the bound themselves; wake the parked ones.
            shared.queue_fill.broadcast();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock();
        st.stopped = true;
        // Queued-but-unstarted tasks are discarded, never run.
        st.queue.clear();
        self.shared.queue_fill.broadcast();
        while st.pool_size > 0 {
            st = self.shared.drained.wait(st);
        }
    }
}

fn worker_main(shared: Arc<PoolShared>) {
    debug!("worker thread started");
    let mut st = shared.state.lock();
    loop {
        if st.stopped || st.pool_size > st.max_size {
            break;
        }
        if !st.suspended {
            if let Some(mut task) = st.queue.pop_front() {
                drop(st);
                task.process();
                st = shared.state.lock();
                continue;
            }
        }
        st.waiting += 1;
        let keep_alive = st.keep_alive;
        let (woken, timed_out) = shared.queue_fill.wait_timeout(st, keep_alive);
        st = woken;
        st.waiting -= 1;
        if timed_out && !st.stopped && !st.suspended && st.queue.is_empty() {
            break;
        }
    }
    // Retirement is decided and recorded under one lock hold, so concurrent
    // retirements cannot observe a stale pool size.
    st.pool_size -= 1;
    if st.pool_size == 0 {
        shared.drained.broadcast();
    }
    drop(st);
    debug!("worker thread stopped");
}
