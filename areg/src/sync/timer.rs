//! Waitable timer

use std::sync::{Arc, Condvar};
use std::time::{Duration, Instant};

use super::{lock_state, Lockable, Notifier, Timeout, Waitable, Watchers};

#[derive(Debug, Default)]
struct TimerState {
    due: Option<Instant>,
    period: Option<Duration>,
}

/// Timer that threads can block on until it fires.
///
/// A one-shot timer fires once and stops; a periodic timer is rearmed by
/// every successful wait.
#[derive(Debug, Default)]
pub struct WaitableTimer {
    state: std::sync::Mutex<TimerState>,
    changed: Condvar,
    watchers: Watchers,
}

impl WaitableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire after `period`
    pub fn start(&self, period: Duration, periodic: bool) {
        let mut state = lock_state(&self.state);
        state.due = Some(Instant::now() + period);
        state.period = periodic.then_some(period);
        drop(state);
        self.changed.notify_all();
        self.watchers.notify();
    }

    /// Disarm the timer
    pub fn stop(&self) {
        let mut state = lock_state(&self.state);
        state.due = None;
        state.period = None;
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_active(&self) -> bool {
        lock_state(&self.state).due.is_some()
    }

    /// Block until the timer fires or `timeout` expires
    pub fn wait(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut state = lock_state(&self.state);
        loop {
            let now = Instant::now();
            if let Some(due) = state.due {
                if now >= due {
                    state.due = state.period.map(|period| due + period);
                    return true;
                }
            }
            if deadline.is_some_and(|deadline| now >= deadline) {
                return false;
            }

            let wake_at = match (state.due, deadline) {
                (Some(due), Some(deadline)) => Some(due.min(deadline)),
                (due, deadline) => due.or(deadline),
            };
            state = match wake_at {
                Some(wake_at) => {
                    self.changed
                        .wait_timeout(state, wake_at.saturating_duration_since(now))
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
            };
        }
    }
}

impl Lockable for WaitableTimer {
    fn lock(&self, timeout: Timeout) -> bool {
        self.wait(timeout)
    }

    fn unlock(&self) -> bool {
        self.stop();
        true
    }
}

impl Waitable for WaitableTimer {
    fn add_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.add(notifier);
    }

    fn remove_watcher(&self, notifier: &Arc<Notifier>) {
        self.watchers.remove(notifier);
    }

    fn next_wakeup(&self) -> Option<Instant> {
        lock_state(&self.state).due
    }

    fn release(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_fires_once() {
        let timer = WaitableTimer::new();
        timer.start(Duration::from_millis(10), false);
        assert!(timer.wait(Timeout::Millis(1000)));
        assert!(!timer.is_active());
        assert!(!timer.wait(Timeout::Millis(20)));
    }

    #[test]
    fn test_periodic_rearms() {
        let timer = WaitableTimer::new();
        timer.start(Duration::from_millis(5), true);
        assert!(timer.wait(Timeout::Millis(1000)));
        assert!(timer.wait(Timeout::Millis(1000)));
        assert!(timer.is_active());
        timer.stop();
        assert!(!timer.wait(Timeout::Millis(20)));
    }
}
