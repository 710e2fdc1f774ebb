//! Recursive mutex with owner tracking

use std::sync::{Arc, Condvar};
use std::thread::{self, ThreadId};

use super::{lock_state, wait_while, Lockable, Notifier, Timeout, Waitable, Watchers};

#[derive(Debug, Default)]
struct MutexState {
    owner: Option<ThreadId>,
    recursion: u32,
}

/// Recursive mutual exclusion object.
///
/// The owning thread may lock it again without blocking; it must call
/// `unlock` once per successful `lock`. Unlike `std::sync::Mutex` this object
/// guards no data, it only serializes the threads calling it.
#[derive(Debug, Default)]
pub struct Mutex {
    state: std::sync::Mutex<MutexState>,
    released: Condvar,
    watchers: Watchers,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mutex already owned by the calling thread
    pub fn new_locked() -> Self {
        let mutex = Self::default();
        mutex.lock(Timeout::Infinite);
        mutex
    }

    /// Thread currently owning the mutex
    pub fn owning_thread_id(&self) -> Option<ThreadId> {
        lock_state(&self.state).owner
    }

    /// Whether any thread currently owns the mutex
    pub fn is_locked(&self) -> bool {
        lock_state(&self.state).owner.is_some()
    }
}

impl Lockable for Mutex {
    fn lock(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        let guard = lock_state(&self.state);
        if guard.owner == Some(me) {
            let mut guard = guard;
            guard.recursion += 1;
            return true;
        }

        let (mut guard, acquired) =
            wait_while(&self.released, guard, timeout.deadline(), |s| s.owner.is_some());
        if acquired {
            guard.owner = Some(me);
            guard.recursion = 1;
        }
        acquired
    }

    fn unlock(&self) -> bool {
        let me = thread::current().id();
        let mut guard = lock_state(&self.state);
        if guard.owner != Some(me) {
            return false;
        }

        guard.recursion -= 1;
        if guard.recursion == 0 {
            guard.owner = None;
            drop(guard);
            self.released.notify_one();
            self.watchers.notify();
        }
        true
    }
}

impl Waitable for Mutex {
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
    use crate::sync::WAIT_INFINITE;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_recursive_lock() {
        let mutex = Mutex::new();
        assert!(mutex.lock(WAIT_INFINITE));
        assert!(mutex.lock(WAIT_INFINITE));
        assert_eq!(mutex.owning_thread_id(), Some(thread::current().id()));

        assert!(mutex.unlock());
        assert!(mutex.is_locked());
        assert!(mutex.unlock());
        assert!(!mutex.is_locked());
        assert!(!mutex.unlock());
    }

    #[test]
    fn test_timeout_and_try_lock_from_other_thread() {
        let mutex = Arc::new(Mutex::new_locked());
        let other = mutex.clone();
        let (timed_out, tried) = thread::spawn(move || {
            (!other.lock(Timeout::Millis(30)), other.try_lock())
        })
        .join()
        .unwrap();

        assert!(timed_out);
        assert!(!tried);
        assert!(mutex.unlock());
    }

    #[test]
    fn test_non_owner_cannot_unlock() {
        let mutex = Arc::new(Mutex::new_locked());
        let other = mutex.clone();
        assert!(!thread::spawn(move || other.unlock()).join().unwrap());
        assert!(mutex.unlock());
    }

    #[test]
    fn test_mutual_exclusion_tracks_owner() {
        let mutex = Arc::new(Mutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let mutex = mutex.clone();
                let inside = inside.clone();
                let violations = violations.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(mutex.lock(WAIT_INFINITE));
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        if mutex.owning_thread_id() != Some(thread::current().id()) {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        assert!(mutex.unlock());
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(!mutex.is_locked());
    }
}
