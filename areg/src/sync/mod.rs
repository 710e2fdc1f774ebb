//! Synchronization primitives
//!
//! Every blocking primitive implements [`Lockable`]: `lock(timeout)`,
//! `unlock()` and a non-blocking `try_lock()`. A finite timeout that expires
//! makes `lock` return `false`; [`WAIT_INFINITE`] waits without bound.
//!
//! Primitives that can take part in a [`MultiLock`] also implement
//! [`Waitable`], which lets a single waiter sleep on several objects at once.

mod critical_section;
mod interlocked;
mod mutex;
mod resource_lock;
mod scoped;
mod semaphore;
mod sync_event;
mod timer;

pub use critical_section::CriticalSection;
pub use interlocked::InterlockedValue;
pub use mutex::Mutex;
pub use resource_lock::{NoLock, ResourceLock, ResourceLockKind};
pub use scoped::{MultiLock, ScopedLock};
pub use semaphore::Semaphore;
pub use sync_event::{ResetMode, SyncEvent};
pub use timer::WaitableTimer;

use std::sync::{Arc, Condvar, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Waiting time for blocking operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Block without bound
    Infinite,
    /// Block at most the given number of milliseconds
    Millis(u64),
}

/// Sentinel for unbounded waits
pub const WAIT_INFINITE: Timeout = Timeout::Infinite;

impl Timeout {
    /// Do not block at all
    pub const IMMEDIATE: Timeout = Timeout::Millis(0);

    /// Absolute deadline for this timeout, `None` when infinite
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(*ms)),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Millis(duration.as_millis() as u64)
    }
}

/// Common contract of all lock-like synchronization objects
pub trait Lockable: Send + Sync {
    /// Acquire the object, waiting at most `timeout`
    fn lock(&self, timeout: Timeout) -> bool;

    /// Release the object
    fn unlock(&self) -> bool;

    /// Acquire without blocking
    fn try_lock(&self) -> bool {
        self.lock(Timeout::IMMEDIATE)
    }
}

/// Objects a [`MultiLock`] can wait on
pub trait Waitable: Lockable {
    /// Register a wake-up token signaled whenever the object may have become available
    fn add_watcher(&self, notifier: &Arc<Notifier>);

    /// Drop a token registered by `add_watcher`
    fn remove_watcher(&self, notifier: &Arc<Notifier>);

    /// Earliest instant the object becomes available without any signal
    fn next_wakeup(&self) -> Option<Instant> {
        None
    }

    /// Undo the acquisition made by a successful `try_lock` when the guard drops
    fn release(&self) -> bool {
        self.unlock()
    }
}

/// Wake-up token shared between a waiter and the objects it watches
#[derive(Debug, Default)]
pub struct Notifier {
    pending: std::sync::Mutex<bool>,
    signal: Condvar,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wake the waiter
    pub fn notify(&self) {
        let mut pending = lock_state(&self.pending);
        *pending = true;
        self.signal.notify_all();
    }

    /// Wait for a notification until `deadline`, consuming it
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let guard = lock_state(&self.pending);
        let (mut pending, notified) = wait_while(&self.signal, guard, deadline, |p| !*p);
        *pending = false;
        notified
    }
}

/// Weak registrations of the notifiers watching one primitive
#[derive(Debug, Default)]
pub(crate) struct Watchers(std::sync::Mutex<Vec<Weak<Notifier>>>);

impl Watchers {
    pub(crate) fn add(&self, notifier: &Arc<Notifier>) {
        let mut watchers = lock_state(&self.0);
        watchers.retain(|watcher| watcher.strong_count() > 0);
        watchers.push(Arc::downgrade(notifier));
    }

    pub(crate) fn remove(&self, notifier: &Arc<Notifier>) {
        let target = Arc::downgrade(notifier);
        lock_state(&self.0)
            .retain(|watcher| watcher.strong_count() > 0 && !watcher.ptr_eq(&target));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock_state(&self.0).len()
    }

    pub(crate) fn notify(&self) {
        let mut watchers = lock_state(&self.0);
        watchers.retain(|watcher| match watcher.upgrade() {
            Some(notifier) => {
                notifier.notify();
                true
            }
            None => false,
        });
    }
}

/// Lock a std mutex, ignoring poisoning: primitive state stays consistent
/// because no user code runs while it is held.
pub(crate) fn lock_state<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on `signal` while `blocked` holds or until `deadline` passes.
/// Returns the guard and whether the condition was satisfied.
pub(crate) fn wait_while<'a, T>(
    signal: &Condvar,
    mut guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
    mut blocked: impl FnMut(&mut T) -> bool,
) -> (MutexGuard<'a, T>, bool) {
    match deadline {
        None => {
            while blocked(&mut *guard) {
                guard = signal.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
            (guard, true)
        }
        Some(deadline) => loop {
            if !blocked(&mut *guard) {
                return (guard, true);
            }
            let now = Instant::now();
            if now >= deadline {
                return (guard, false);
            }
            guard = signal
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        },
    }
}
