//! Shared ownership of OS socket descriptors

use std::hash::{Hash, Hasher};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Weak};

use crate::sync::InterlockedValue;

static NEXT_HANDLE_ID: InterlockedValue = InterlockedValue::new(0);

#[derive(Debug)]
pub(crate) enum Descriptor {
    Stream(TcpStream),
    Listener(TcpListener),
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    descriptor: Descriptor,
    #[cfg(test)]
    close_counter: Option<Arc<std::sync::atomic::AtomicUsize>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // The descriptor itself is closed when `descriptor` drops right after.
        tracing::trace!("🔌 Closing socket handle {}", self.id);
        #[cfg(test)]
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Reference-counted socket descriptor.
///
/// Cloning adds an owner; the descriptor is closed exactly once, when the
/// last owner is dropped.
#[derive(Debug, Clone)]
pub struct SocketHandle(Arc<HandleInner>);

impl SocketHandle {
    fn new(descriptor: Descriptor) -> Self {
        Self(Arc::new(HandleInner {
            id: NEXT_HANDLE_ID.increment(),
            descriptor,
            #[cfg(test)]
            close_counter: None,
        }))
    }

    pub(crate) fn from_stream(stream: TcpStream) -> Self {
        Self::new(Descriptor::Stream(stream))
    }

    pub(crate) fn from_listener(listener: TcpListener) -> Self {
        Self::new(Descriptor::Listener(listener))
    }

    #[cfg(test)]
    pub(crate) fn with_close_counter(
        stream: TcpStream,
        counter: Arc<std::sync::atomic::AtomicUsize>,
    ) -> Self {
        Self(Arc::new(HandleInner {
            id: NEXT_HANDLE_ID.increment(),
            descriptor: Descriptor::Stream(stream),
            close_counter: Some(counter),
        }))
    }

    /// Process-unique identifier of the descriptor
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Number of owners sharing the descriptor
    pub fn lock_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakSocketHandle {
        WeakSocketHandle(Arc::downgrade(&self.0))
    }

    pub(crate) fn stream(&self) -> Option<&TcpStream> {
        match &self.0.descriptor {
            Descriptor::Stream(stream) => Some(stream),
            Descriptor::Listener(_) => None,
        }
    }

    pub(crate) fn listener(&self) -> Option<&TcpListener> {
        match &self.0.descriptor {
            Descriptor::Listener(listener) => Some(listener),
            Descriptor::Stream(_) => None,
        }
    }

    /// Shut down both directions, waking threads blocked on the descriptor.
    /// The descriptor stays open until the last owner drops.
    pub fn shutdown(&self) {
        if let Some(stream) = self.stream() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SocketHandle {}

impl Hash for SocketHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

/// Non-owning reference to a socket descriptor
#[derive(Debug, Clone, Default)]
pub struct WeakSocketHandle(Weak<HandleInner>);

impl WeakSocketHandle {
    pub fn upgrade(&self) -> Option<SocketHandle> {
        self.0.upgrade().map(SocketHandle)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_descriptor_closed_exactly_once() {
        for copies in 1..5 {
            let (client, _server) = connected_pair();
            let counter = Arc::new(AtomicUsize::new(0));
            let handle = SocketHandle::with_close_counter(client, counter.clone());

            let clones: Vec<_> = (1..copies).map(|_| handle.clone()).collect();
            assert_eq!(handle.lock_count(), copies);

            drop(handle);
            assert_eq!(counter.load(Ordering::SeqCst), usize::from(copies == 1));
            drop(clones);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_peer_sees_close_after_last_owner() {
        let (client, mut server) = connected_pair();
        let handle = SocketHandle::from_stream(client);
        let weak = handle.downgrade();
        let copy = handle.clone();

        drop(handle);
        assert!(weak.is_alive());
        drop(copy);
        assert!(!weak.is_alive());

        let mut buf = [0u8; 4];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }
}
