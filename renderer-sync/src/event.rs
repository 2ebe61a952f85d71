//! One-shot signal/broadcast event.

use crate::{Condition, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct EventState {
    notified: bool,
    notify_one: bool,
    waiting: u32,
}

/// A "signalled until reset" event.
///
/// `signal` releases one waiter, `broadcast` releases all of them. In the
/// default auto-reset mode a signalled wake consumes the notification: after
/// a `signal` the first waiter resets the flag, after a `broadcast` the flag
/// stays up until the last woken waiter leaves, so none of them miss it. A
/// notification raised while nobody waits is latched and satisfies the next
/// `wait` immediately.
#[derive(Debug)]
pub struct Event {
    state: Mutex<EventState>,
    cond: Condition,
    auto_reset: bool,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Auto-reset event.
    pub fn new() -> Self {
        Self::with_auto_reset(true)
    }

    pub fn with_auto_reset(auto_reset: bool) -> Self {
        Self {
            state: Mutex::new(EventState::default()),
            cond: Condition::new(),
            auto_reset,
        }
    }

    /// Notify one waiter.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.notify_one = true;
        state.notified = true;
        self.cond.signal();
    }

    /// Notify every waiter.
    pub fn broadcast(&self) {
        let mut state = self.state.lock();
        state.notify_one = false;
        state.notified = true;
        self.cond.broadcast();
    }

    /// Block until notified.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        state.waiting += 1;
        while !state.notified {
            state = self.cond.wait(state);
        }
        state.waiting -= 1;
        if self.auto_reset {
            let consume = state.notify_one;
            Self::reset_state(&mut state, consume);
        }
    }

    /// Block until notified or `timeout` elapses; returns whether the event
    /// was notified.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        state.waiting += 1;
        while !state.notified {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            let (next, _) = self.cond.wait_timeout(state, deadline - now);
            state = next;
        }
        let notified = state.notified;
        state.waiting -= 1;
        if self.auto_reset && notified {
            let consume = state.notify_one;
            Self::reset_state(&mut state, consume);
        }
        notified
    }

    /// Clear any pending notification.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        Self::reset_state(&mut state, true);
    }

    fn reset_state(state: &mut EventState, force: bool) {
        if force || state.waiting == 0 {
            state.notified = false;
        }
    }
}
