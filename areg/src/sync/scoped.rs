//! Scoped lock guards

use std::time::Instant;

use super::{Lockable, Notifier, Timeout, Waitable, WAIT_INFINITE};

/// Acquires a lock on construction and releases it on drop, on every exit
/// path including unwinding.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedLock<'a, L: Lockable + ?Sized> {
    lock: &'a L,
    locked: bool,
}

impl<'a, L: Lockable + ?Sized> ScopedLock<'a, L> {
    pub fn new(lock: &'a L) -> Self {
        Self::with_timeout(lock, WAIT_INFINITE)
    }

    pub fn with_timeout(lock: &'a L, timeout: Timeout) -> Self {
        let locked = lock.lock(timeout);
        Self { lock, locked }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Release before the guard goes out of scope
    pub fn unlock(&mut self) -> bool {
        if !self.locked {
            return false;
        }
        self.locked = false;
        self.lock.unlock()
    }
}

impl<L: Lockable + ?Sized> Drop for ScopedLock<'_, L> {
    fn drop(&mut self) {
        if self.locked {
            self.lock.unlock();
        }
    }
}

/// Waits on several objects at once, either for any one of them or for all.
///
/// Acquired objects are released when the guard drops. A wait-all that
/// times out releases whatever it had acquired so far.
#[must_use = "acquired objects are released as soon as the guard is dropped"]
pub struct MultiLock<'a> {
    objects: Vec<&'a dyn Waitable>,
    acquired: Vec<bool>,
    wait_all: bool,
}

impl<'a> MultiLock<'a> {
    /// Acquire the first object that becomes available
    pub fn wait_any(objects: &[&'a dyn Waitable], timeout: Timeout) -> Self {
        Self::acquire(objects, false, timeout)
    }

    /// Acquire every object
    pub fn wait_all(objects: &[&'a dyn Waitable], timeout: Timeout) -> Self {
        Self::acquire(objects, true, timeout)
    }

    fn acquire(objects: &[&'a dyn Waitable], wait_all: bool, timeout: Timeout) -> Self {
        let mut lock = Self {
            objects: objects.to_vec(),
            acquired: vec![false; objects.len()],
            wait_all,
        };
        if objects.is_empty() {
            return lock;
        }

        let notifier = Notifier::new();
        for object in objects {
            object.add_watcher(&notifier);
        }
        lock.wait(&notifier, timeout.deadline());
        for object in objects {
            object.remove_watcher(&notifier);
        }
        lock
    }

    fn wait(&mut self, notifier: &Notifier, deadline: Option<Instant>) {
        loop {
            for (index, object) in self.objects.iter().enumerate() {
                if !self.acquired[index] && object.try_lock() {
                    self.acquired[index] = true;
                    if !self.wait_all {
                        return;
                    }
                }
            }
            if self.wait_all && self.acquired.iter().all(|acquired| *acquired) {
                return;
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                self.release_all();
                return;
            }

            let wakeup = self
                .objects
                .iter()
                .zip(&self.acquired)
                .filter(|(_, acquired)| !**acquired)
                .filter_map(|(object, _)| object.next_wakeup())
                .chain(deadline)
                .min();
            notifier.wait_until(wakeup);
        }
    }

    /// Whether the wait condition was met
    pub fn is_locked(&self) -> bool {
        if self.wait_all {
            !self.acquired.is_empty() && self.acquired.iter().all(|acquired| *acquired)
        } else {
            self.acquired.iter().any(|acquired| *acquired)
        }
    }

    /// Index of the first acquired object
    pub fn first_acquired(&self) -> Option<usize> {
        self.acquired.iter().position(|acquired| *acquired)
    }

    pub fn is_acquired(&self, index: usize) -> bool {
        self.acquired.get(index).copied().unwrap_or(false)
    }

    fn release_all(&mut self) {
        for (object, acquired) in self.objects.iter().zip(self.acquired.iter_mut()) {
            if *acquired {
                object.release();
                *acquired = false;
            }
        }
    }
}

impl Drop for MultiLock<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Mutex, Semaphore, SyncEvent, WaitableTimer};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_scoped_lock_releases_on_drop() {
        let mutex = Mutex::new();
        {
            let guard = ScopedLock::new(&mutex);
            assert!(guard.is_locked());
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_scoped_lock_releases_on_unwind() {
        let mutex = Arc::new(Mutex::new());
        let inner = mutex.clone();
        let result = thread::spawn(move || {
            let _guard = ScopedLock::new(inner.as_ref());
            panic!("handler failed");
        })
        .join();
        assert!(result.is_err());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_multi_lock_any_reports_signaled_object() {
        let first = SyncEvent::manual(false);
        let second = Arc::new(SyncEvent::auto(false));
        let setter = second.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        let lock = MultiLock::wait_any(&[&first, second.as_ref()], Timeout::Millis(2000));
        handle.join().unwrap();
        assert!(lock.is_locked());
        assert_eq!(lock.first_acquired(), Some(1));
        assert!(!lock.is_acquired(0));
    }

    #[test]
    fn test_multi_lock_all_times_out_and_releases() {
        let semaphore = Semaphore::new(1, 1);
        let event = SyncEvent::manual(false);
        {
            let lock = MultiLock::wait_all(&[&semaphore, &event], Timeout::Millis(20));
            assert!(!lock.is_locked());
        }
        assert_eq!(semaphore.current_count(), 1);

        event.set();
        let lock = MultiLock::wait_all(&[&semaphore, &event], Timeout::Millis(20));
        assert!(lock.is_locked());
        assert_eq!(semaphore.current_count(), 0);
        drop(lock);
        assert_eq!(semaphore.current_count(), 1);
    }

    #[test]
    fn test_multi_lock_wakes_on_timer() {
        let timer = WaitableTimer::new();
        let stop = SyncEvent::manual(false);
        timer.start(Duration::from_millis(15), false);
        let lock = MultiLock::wait_any(&[&timer, &stop], Timeout::Millis(2000));
        assert_eq!(lock.first_acquired(), Some(0));
    }
}
