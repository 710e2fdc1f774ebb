//! Resource lock selecting the synchronization strategy at construction

use super::{CriticalSection, Lockable, Mutex, Timeout};

/// Lock that satisfies the [`Lockable`] contract without synchronizing.
///
/// Used for resources that are deliberately confined to one thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl Lockable for NoLock {
    fn lock(&self, _timeout: Timeout) -> bool {
        true
    }

    fn unlock(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLockKind {
    Mutex,
    CriticalSection,
    NoLock,
}

/// Lock guarding a shared resource.
///
/// The default is a critical section, the fastest intra-process exclusion
/// available here; callers that need timeouts pick the mutex and components
/// that never share the resource pick [`NoLock`].
#[derive(Debug)]
pub enum ResourceLock {
    Mutex(Mutex),
    CriticalSection(CriticalSection),
    NoLock(NoLock),
}

impl ResourceLock {
    pub fn new() -> Self {
        Self::with_kind(ResourceLockKind::CriticalSection)
    }

    pub fn with_kind(kind: ResourceLockKind) -> Self {
        match kind {
            ResourceLockKind::Mutex => ResourceLock::Mutex(Mutex::new()),
            ResourceLockKind::CriticalSection => {
                ResourceLock::CriticalSection(CriticalSection::new())
            }
            ResourceLockKind::NoLock => ResourceLock::NoLock(NoLock),
        }
    }

    pub fn no_lock() -> Self {
        Self::with_kind(ResourceLockKind::NoLock)
    }

    pub fn kind(&self) -> ResourceLockKind {
        match self {
            ResourceLock::Mutex(_) => ResourceLockKind::Mutex,
            ResourceLock::CriticalSection(_) => ResourceLockKind::CriticalSection,
            ResourceLock::NoLock(_) => ResourceLockKind::NoLock,
        }
    }

    fn inner(&self) -> &dyn Lockable {
        match self {
            ResourceLock::Mutex(lock) => lock,
            ResourceLock::CriticalSection(lock) => lock,
            ResourceLock::NoLock(lock) => lock,
        }
    }
}

impl Default for ResourceLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable for ResourceLock {
    fn lock(&self, timeout: Timeout) -> bool {
        self.inner().lock(timeout)
    }

    fn unlock(&self) -> bool {
        self.inner().unlock()
    }

    fn try_lock(&self) -> bool {
        self.inner().try_lock()
    }
}
