//! Fair shared lock ("latch").
//!
//! A reader/writer lock with three properties the std `RwLock` does not
//! offer together: recursive re-acquisition by the holding thread (in both
//! exclusive and shared mode), configurable reader/writer precedence, and a
//! two-gate release protocol that keeps a queued exclusive request from
//! being starved by a stream of readers.
//!
//! Exclusive acquisition runs in two phases. A requester first arbitrates on
//! the X gate until the exclusive flag is free or was handed off to the wait
//! queue, then claims the flag and drains existing shared holders on the
//! S gate; the last shared holder completes the handover. Release with
//! waiters queued leaves the flag in the handed-off level, which new shared
//! requests do not pass, so one of the queued exclusive requests wins next.
//!
//! Shared recursion is tracked per thread in a map keyed by `ThreadId`.

use crate::{Condition, Mutex};
use std::collections::HashMap;
use std::thread::{self, ThreadId};

/// Exclusive-flag levels. Values above `X_HELD` encode recursion depth.
const X_FREE: u32 = 0;
const X_WAIT_S: u32 = 1;
const X_HANDOFF: u32 = 2;
const X_HELD: u32 = 3;

#[derive(Debug, Default)]
struct LatchState {
    x_flag: u32,
    x_wait: u32,
    x_owner: Option<ThreadId>,
    /// Shared holders: thread id -> recursion count.
    shared: HashMap<ThreadId, usize>,
}

impl LatchState {
    fn holds_shared(&self, tid: ThreadId) -> bool {
        self.shared.contains_key(&tid)
    }

    /// No shared holder remains other than (possibly) `tid` itself.
    fn shared_drained_for(&self, tid: ThreadId) -> bool {
        match self.shared.len() {
            0 => true,
            1 => self.shared.contains_key(&tid),
            _ => false,
        }
    }
}

/// Fair recursive reader/writer lock with configurable precedence.
#[derive(Debug)]
pub struct Latch {
    /// Writer precedence: when true, a new shared request yields to a
    /// pending exclusive request instead of overtaking it.
    px: bool,
    state: Mutex<LatchState>,
    x_gate: Condition,
    s_gate: Condition,
}

impl Latch {
    /// `writer_precedence` selects whether a shared request arriving while
    /// an exclusive request is pending must wait (`true`) or may proceed
    /// (`false`).
    pub fn new(writer_precedence: bool) -> Self {
        Self {
            px: writer_precedence,
            state: Mutex::new(LatchState::default()),
            x_gate: Condition::new(),
            s_gate: Condition::new(),
        }
    }

    /// Acquire exclusive ownership. Re-entrant for the thread that already
    /// holds exclusive ownership.
    pub fn lock(&self) -> LatchGuard<'_> {
        let tid = thread::current().id();
        let mut st = self.state.lock();

        if st.x_owner == Some(tid) {
            // Recursive exclusive lock.
            st.x_flag += 1;
            return LatchGuard { latch: self };
        }

        // Phase one: win the arbitration for the exclusive flag.
        st.x_wait += 1;
        while st.x_flag != X_FREE && st.x_flag != X_HANDOFF {
            st = self.x_gate.wait(st);
        }
        st.x_flag = X_WAIT_S;
        st.x_wait -= 1;
        // A shared holder that parked while the flag sat at the handed-off
        // level is admissible again at the drain level; wake the gate so it
        // re-tests, or it would never drain and phase two would never end.
        self.x_gate.broadcast();

        // Phase two: wait for the shared holders to drain.
        loop {
            if st.shared_drained_for(tid) {
                st.x_flag = X_HELD;
                break;
            }
            st = self.s_gate.wait(st);
            if st.x_flag == X_HELD {
                // The last shared holder completed the handover.
                break;
            }
        }
        st.x_owner = Some(tid);
        LatchGuard { latch: self }
    }

    /// Acquire shared ownership. Re-entrant for a thread that already holds
    /// shared or exclusive ownership.
    pub fn lock_shared(&self) -> LatchSharedGuard<'_> {
        let tid = thread::current().id();
        let mut st = self.state.lock();

        if st.x_owner != Some(tid) {
            loop {
                let admitted = if self.px {
                    st.x_flag == X_FREE || (st.x_flag == X_WAIT_S && st.holds_shared(tid))
                } else {
                    st.x_flag < X_HANDOFF
                };
                if admitted {
                    break;
                }
                st = self.x_gate.wait(st);
            }
        }
        *st.shared.entry(tid).or_insert(0) += 1;
        LatchSharedGuard { latch: self }
    }

    /// Acquire shared ownership without blocking. Fails whenever the
    /// exclusive flag is raised by another thread, even at the
    /// waiting-for-readers level.
    pub fn try_lock_shared(&self) -> Option<LatchSharedGuard<'_>> {
        let tid = thread::current().id();
        let mut st = self.state.lock();
        if st.x_flag == X_FREE || st.x_owner == Some(tid) {
            *st.shared.entry(tid).or_insert(0) += 1;
            Some(LatchSharedGuard { latch: self })
        } else {
            None
        }
    }

    fn unlock(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();
        if st.x_owner != Some(tid) {
            debug_assert!(false, "exclusive unlock by non-owner");
            return;
        }
        st.x_flag -= 1;
        if st.x_flag == X_HANDOFF {
            st.x_owner = None;
            if st.x_wait == 0 {
                st.x_flag = X_FREE;
            }
            // Waiters re-test under the state lock; broadcast covers both
            // queued exclusive requests and parked shared requests.
            self.x_gate.broadcast();
        }
    }

    fn unlock_shared(&self) {
        let tid = thread::current().id();
        let mut st = self.state.lock();
        let count = match st.shared.get_mut(&tid) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => {
                debug_assert!(false, "shared unlock by non-holder");
                return;
            }
        };
        if count > 0 {
            return;
        }
        st.shared.remove(&tid);
        if st.x_flag == X_WAIT_S && st.x_owner != Some(tid) {
            if st.shared.is_empty() {
                // Last holder out: hand exclusive ownership over.
                st.x_flag = X_HELD;
            }
            self.s_gate.signal();
        }
    }
}

/// Exclusive ownership; released on drop.
#[must_use = "the latch is released when the guard is dropped"]
#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a Latch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.unlock();
    }
}

/// Shared ownership; released on drop.
#[must_use = "the latch is released when the guard is dropped"]
#[derive(Debug)]
pub struct LatchSharedGuard<'a> {
    latch: &'a Latch,
}

impl Drop for LatchSharedGuard<'_> {
    fn drop(&mut self) {
        self.latch.unlock_shared();
    }
}
