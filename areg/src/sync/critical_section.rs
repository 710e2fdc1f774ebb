//! Critical section

use super::{Lockable, Mutex, Timeout, WAIT_INFINITE};

/// Intra-process mutual exclusion without timeouts or ownership queries.
///
/// Entering always waits indefinitely; the owner may re-enter.
#[derive(Debug, Default)]
pub struct CriticalSection {
    inner: Mutex,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        self.inner.lock(WAIT_INFINITE);
    }

    pub fn leave(&self) -> bool {
        self.inner.unlock()
    }

    pub fn try_enter(&self) -> bool {
        self.inner.try_lock()
    }
}

impl Lockable for CriticalSection {
    fn lock(&self, _timeout: Timeout) -> bool {
        self.enter();
        true
    }

    fn unlock(&self) -> bool {
        self.leave()
    }

    fn try_lock(&self) -> bool {
        self.try_enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_enter_ignores_timeout() {
        let section = Arc::new(CriticalSection::new());
        section.enter();

        let other = section.clone();
        let handle = thread::spawn(move || {
            let tried = other.try_enter();
            // waits for the owner instead of giving up after 1ms
            let locked = other.lock(Timeout::Millis(1));
            other.leave();
            (tried, locked)
        });

        thread::sleep(std::time::Duration::from_millis(20));
        assert!(section.leave());
        assert_eq!(handle.join().unwrap(), (false, true));
    }
}
