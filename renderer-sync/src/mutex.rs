//! Poison-absorbing monitor pair: `Mutex` and `Condition`.
//!
//! Every long-lived thread in the event core parks on a queue-plus-condvar
//! handoff. Locking must therefore be infallible: a panic on one thread must
//! not wedge the accept loop or a dispatch queue behind a `PoisonError`. The
//! wrappers below recover the inner guard from a poisoned lock and move on.

use std::sync::{Condvar, MutexGuard, PoisonError};
use std::time::Duration;

/// Exclusive lock whose `lock` never fails.
#[derive(Debug, Default)]
pub struct Mutex<T>(std::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self(std::sync::Mutex::new(value))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> T {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Condition variable paired with [`Mutex`].
#[derive(Debug, Default)]
pub struct Condition(Condvar);

impl Condition {
    pub fn new() -> Self {
        Self(Condvar::new())
    }

    /// Wake one waiter.
    pub fn signal(&self) {
        self.0.notify_one();
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        self.0.notify_all();
    }

    /// Block until signalled. Spurious wakeups are possible; callers loop on
    /// their predicate.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until signalled or `timeout` elapses. The boolean is true when
    /// the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let (guard, result) = self
            .0
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mutex_lock_and_mutate() {
        let m = Mutex::new(0u32);
        *m.lock() += 1;
        assert_eq!(*m.lock(), 1);
        assert_eq!(m.into_inner(), 1);
    }

    #[test]
    fn test_condition_signals_waiter() {
        let shared = Arc::new((Mutex::new(false), Condition::new()));
        let peer = Arc::clone(&shared);
        let waiter = thread::spawn(move || {
            let (lock, cond) = &*peer;
            let mut ready = lock.lock();
            while !*ready {
                ready = cond.wait(ready);
            }
        });
        let (lock, cond) = &*shared;
        *lock.lock() = true;
        cond.broadcast();
        waiter.join().unwrap();
    }

    #[test]
    fn test_condition_wait_timeout_elapses() {
        let m = Mutex::new(());
        let cond = Condition::new();
        let (_guard, timed_out) = cond.wait_timeout(m.lock(), Duration::from_millis(20));
        assert!(timed_out);
    }

    #[test]
    fn test_mutex_survives_poison() {
        let m = Arc::new(Mutex::new(7u32));
        let peer = Arc::clone(&m);
        let _ = thread::spawn(move || {
            let _guard = peer.lock();
            panic!("poison the lock");
        })
        .join();
        // The value is still reachable after the panicking holder.
        assert_eq!(*m.lock(), 7);
    }
}
