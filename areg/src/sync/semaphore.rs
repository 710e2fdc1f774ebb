//! Counting semaphore

use std::sync::{Arc, Condvar};

use super::{lock_state, wait_while, Lockable, Notifier, Timeout, Waitable, Watchers};

/// Counting semaphore bounded by `[0, max_count]`.
///
/// `lock` blocks while the count is zero and decrements it; `unlock`
/// increments it and fails when the count is already at its maximum.
#[derive(Debug)]
pub struct Semaphore {
    count: std::sync::Mutex<u32>,
    max_count: u32,
    available: Condvar,
    watchers: Watchers,
}

impl Semaphore {
    pub fn new(initial: u32, max_count: u32) -> Self {
        let max_count = max_count.max(1);
        Self {
            count: std::sync::Mutex::new(initial.min(max_count)),
            max_count,
            available: Condvar::new(),
            watchers: Watchers::default(),
        }
    }

    pub fn current_count(&self) -> u32 {
        *lock_state(&self.count)
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }
}

impl Lockable for Semaphore {
    fn lock(&self, timeout: Timeout) -> bool {
        let guard = lock_state(&self.count);
        let (mut count, acquired) =
            wait_while(&self.available, guard, timeout.deadline(), |c| *c == 0);
        if acquired {
            *count -= 1;
        }
        acquired
    }

    fn unlock(&self) -> bool {
        let mut count = lock_state(&self.count);
        if *count >= self.max_count {
            return false;
        }
        *count += 1;
        drop(count);
        self.available.notify_one();
        self.watchers.notify();
        true
    }
}

impl Waitable for Semaphore {
    fn add_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.add(notifier);
    }

    fn remove_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.remove(notifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_count_is_bounded() {
        let semaphore = Semaphore::new(1, 2);
        assert!(semaphore.unlock());
        assert!(!semaphore.unlock());
        assert_eq!(semaphore.current_count(), 2);

        assert!(semaphore.try_lock());
        assert!(semaphore.try_lock());
        assert!(!semaphore.try_lock());
        assert_eq!(semaphore.current_count(), 0);
    }

    #[test]
    fn test_lock_blocks_until_released() {
        let semaphore = Arc::new(Semaphore::new(0, 1));
        let releaser = semaphore.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            releaser.unlock()
        });

        assert!(semaphore.lock(Timeout::Millis(2000)));
        assert!(handle.join().unwrap());
        assert!(!semaphore.lock(Timeout::Millis(10)));
    }
}
