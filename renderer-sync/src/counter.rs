//! Relaxed atomic counter for reference counts and small shared flags.

use std::sync::atomic::{AtomicI64, Ordering};

/// Lock-free integer with relaxed ordering.
///
/// All operations use `Ordering::Relaxed`: the counter carries no
/// happens-before edges of its own and is meant for flags and counts whose
/// consumers synchronize elsewhere (a queue mutex, a thread join).
#[derive(Debug, Default)]
pub struct Counter(AtomicI64);

impl Counter {
    pub const fn new(value: i64) -> Self {
        Self(AtomicI64::new(value))
    }

    pub fn load(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn store(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement and return the new value.
    pub fn decrement(&self) -> i64 {
        self.0.fetch_sub(1, Ordering::Relaxed) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_basic() {
        let c = Counter::new(5);
        assert_eq!(c.load(), 5);
        assert_eq!(c.increment(), 6);
        assert_eq!(c.decrement(), 5);
        c.store(0);
        assert_eq!(c.load(), 0);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let c = Arc::new(Counter::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.increment();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.load(), 8000);
    }
}
