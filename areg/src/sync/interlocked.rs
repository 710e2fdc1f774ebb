//! Interlocked counter

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter shared between threads without an external lock
#[derive(Debug, Default)]
pub struct InterlockedValue(AtomicU64);

impl InterlockedValue {
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return the new value
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Decrement and return the new value, saturating at zero
    pub fn decrement(&self) -> u64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(1);
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u64) -> u64 {
        self.0.swap(value, Ordering::AcqRel)
    }

    /// Replace `current` with `new` if it matches, returning whether it did
    pub fn test_and_set(&self, current: u64, new: u64) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_decrement() {
        let value = InterlockedValue::new(0);
        assert_eq!(value.increment(), 1);
        assert_eq!(value.increment(), 2);
        assert_eq!(value.decrement(), 1);
        assert_eq!(value.decrement(), 0);
        assert_eq!(value.decrement(), 0);
        assert!(value.test_and_set(0, 7));
        assert!(!value.test_and_set(0, 8));
        assert_eq!(value.get(), 7);
    }

    #[test]
    fn test_concurrent_increments() {
        let value = Arc::new(InterlockedValue::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let value = value.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        value.increment();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(value.get(), 4000);
    }
}
