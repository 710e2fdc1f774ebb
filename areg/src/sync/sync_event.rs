//! Manual- and auto-reset synchronization events

use std::sync::{Arc, Condvar};

use super::{lock_state, wait_while, Lockable, Notifier, Timeout, Waitable, Watchers};

/// How a signaled event reverts to non-signaled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays signaled until `reset` is called; releases every waiter
    Manual,
    /// Releases a single waiter, then reverts automatically
    Auto,
}

/// Signal object threads can wait on.
///
/// `lock` waits for the signal and `unlock` sets it.
#[derive(Debug)]
pub struct SyncEvent {
    signaled: std::sync::Mutex<bool>,
    changed: Condvar,
    mode: ResetMode,
    watchers: Watchers,
}

impl SyncEvent {
    pub fn new(initially_signaled: bool, mode: ResetMode) -> Self {
        Self {
            signaled: std::sync::Mutex::new(initially_signaled),
            changed: Condvar::new(),
            mode,
            watchers: Watchers::default(),
        }
    }

    pub fn manual(initially_signaled: bool) -> Self {
        Self::new(initially_signaled, ResetMode::Manual)
    }

    pub fn auto(initially_signaled: bool) -> Self {
        Self::new(initially_signaled, ResetMode::Auto)
    }

    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Signal the event
    pub fn set(&self) -> bool {
        let mut signaled = lock_state(&self.signaled);
        *signaled = true;
        drop(signaled);
        match self.mode {
            ResetMode::Manual => self.changed.notify_all(),
            ResetMode::Auto => self.changed.notify_one(),
        }
        self.watchers.notify();
        true
    }

    /// Revert to non-signaled
    pub fn reset(&self) -> bool {
        *lock_state(&self.signaled) = false;
        true
    }

    /// Wait for the signal; auto-reset events are consumed by the waiter
    pub fn wait(&self, timeout: Timeout) -> bool {
        let guard = lock_state(&self.signaled);
        let (mut signaled, released) =
            wait_while(&self.changed, guard, timeout.deadline(), |s| !*s);
        if released && self.mode == ResetMode::Auto {
            *signaled = false;
        }
        released
    }

    pub fn is_signaled(&self) -> bool {
        *lock_state(&self.signaled)
    }
}

impl Lockable for SyncEvent {
    fn lock(&self, timeout: Timeout) -> bool {
        self.wait(timeout)
    }

    fn unlock(&self) -> bool {
        self.set()
    }
}

impl Waitable for SyncEvent {
    fn add_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.add(notifier);
    }

    fn remove_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.remove(notifier);
    }

    // Waiting on an event does not take ownership, nothing to give back.
    fn release(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = SyncEvent::manual(false);
        assert!(!event.wait(Timeout::Millis(5)));
        event.set();
        assert!(event.wait(Timeout::IMMEDIATE));
        assert!(event.wait(Timeout::IMMEDIATE));
        event.reset();
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_auto_reset_releases_one_waiter() {
        let event = SyncEvent::auto(true);
        assert!(event.wait(Timeout::IMMEDIATE));
        assert!(!event.wait(Timeout::IMMEDIATE));
    }

    #[test]
    fn test_set_wakes_waiting_thread() {
        let event = Arc::new(SyncEvent::auto(false));
        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait(Timeout::Millis(2000)));
        thread::sleep(Duration::from_millis(20));
        event.set();
        assert!(handle.join().unwrap());
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_repeated_multi_waits_leave_no_watchers() {
        use crate::sync::{MultiLock, WaitableTimer};

        let stop = SyncEvent::manual(false);
        let timer = WaitableTimer::new();
        for _ in 0..200 {
            timer.start(Duration::from_millis(1), false);
            let wait = MultiLock::wait_any(&[&stop, &timer], Timeout::Millis(2000));
            assert!(wait.is_acquired(1));
        }
        assert_eq!(stop.watchers.len(), 0);

        stop.set();
        let wait = MultiLock::wait_any(&[&stop, &timer], Timeout::IMMEDIATE);
        assert_eq!(wait.first_acquired(), Some(0));
        assert_eq!(stop.watchers.len(), 0);
    }
}
