//! Listening sockets and connection multiplexing

use std::io::ErrorKind;
use std::net::TcpListener;
use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::{Duration, Instant};

use super::{
    AcceptedSocket, ConnectionEvent, Socket, SocketAddress, SocketHandle,
    MAXIMUM_LISTEN_QUEUE_SIZE,
};
use crate::{Error, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Socket bound to a local endpoint that accepts connections
#[derive(Debug, Clone)]
pub struct ServerSocket {
    socket: Socket,
    listen_queue: i32,
    listening: bool,
    poll_interval: Duration,
}

impl Default for ServerSocket {
    fn default() -> Self {
        Self {
            socket: Socket::default(),
            listen_queue: 0,
            listening: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ServerSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(host: &str, port: u16) -> Self {
        let mut server = Self::default();
        server.socket.set_address(host, port);
        server
    }

    /// Pause between readiness scans while waiting for events
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(Duration::from_millis(1));
    }

    /// Set the endpoint and bind
    pub fn create_socket_at(&mut self, host: &str, port: u16) -> Result<()> {
        if !self.socket.set_address(host, port) {
            self.listening = false;
            return Err(Error::connection_msg(format!(
                "cannot resolve {host}:{port}"
            )));
        }
        self.create_socket()
    }

    /// Bind to the configured endpoint; no-op when already bound
    pub fn create_socket(&mut self) -> Result<()> {
        if self.socket.is_valid() {
            return Ok(());
        }
        self.listening = false;
        let addr = self
            .socket
            .address()
            .socket_addr()
            .ok_or_else(|| Error::connection_msg("server socket has no resolved address"))?;

        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::connection(format!("bind to {addr} failed"), e))?;
        // Port 0 binds an ephemeral port; keep the real one.
        let local = listener.local_addr()?;
        self.socket
            .set_resolved_address(SocketAddress::from_socket_addr(local));
        self.socket.attach(SocketHandle::from_listener(listener));
        tracing::info!("🎧 Server socket bound to {}", local);
        Ok(())
    }

    /// Start accepting connections. The queue size is clamped to
    /// [`MAXIMUM_LISTEN_QUEUE_SIZE`]; non-positive values select the maximum.
    pub fn listen_connection(&mut self, max_queue: i32) -> Result<()> {
        let listener = self.listener()?;
        listener.set_nonblocking(true)?;
        self.listen_queue = if max_queue <= 0 {
            MAXIMUM_LISTEN_QUEUE_SIZE
        } else {
            max_queue.min(MAXIMUM_LISTEN_QUEUE_SIZE)
        };
        self.listening = true;
        tracing::debug!(
            "Listening on {} (queue {})",
            self.socket.address(),
            self.listen_queue
        );
        Ok(())
    }

    pub fn listen_queue(&self) -> i32 {
        self.listen_queue
    }

    pub fn is_listening(&self) -> bool {
        self.listening && self.socket.is_valid()
    }

    fn listener(&self) -> Result<&TcpListener> {
        self.socket
            .handle()
            .and_then(SocketHandle::listener)
            .ok_or_else(|| Error::connection_msg("server socket is not bound"))
    }

    /// Block until a client connects
    pub fn accept_connection(&self) -> Result<AcceptedSocket> {
        loop {
            if let Some(ConnectionEvent::Accepted(accepted)) = self.poll_once(&[])? {
                return Ok(accepted);
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Block until a client connects or a socket of `master_list` becomes
    /// readable or closes.
    ///
    /// Sockets of the master list must not be read by other threads while
    /// this call is in progress.
    pub fn wait_for_connection_event(
        &self,
        master_list: &[SocketHandle],
    ) -> Result<ConnectionEvent> {
        loop {
            if let Some(event) = self.poll_once(master_list)? {
                return Ok(event);
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Same as [`wait_for_connection_event`](Self::wait_for_connection_event)
    /// but gives up after `timeout`, returning `None`
    pub fn wait_for_connection_event_timeout(
        &self,
        master_list: &[SocketHandle],
        timeout: Duration,
    ) -> Result<Option<ConnectionEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.poll_once(master_list)? {
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Wait until at least one event is ready or `timeout` passes, then
    /// report every pending connection and every active socket of
    /// `master_list` at once, so no single busy connection is served
    /// ahead of the others.
    pub fn wait_for_connection_events_timeout(
        &self,
        master_list: &[SocketHandle],
        timeout: Duration,
    ) -> Result<Vec<ConnectionEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.poll(master_list, true)?;
            if !events.is_empty() {
                return Ok(events);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(events);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn poll_once(&self, master_list: &[SocketHandle]) -> Result<Option<ConnectionEvent>> {
        Ok(self.poll(master_list, false)?.into_iter().next())
    }

    fn poll(&self, master_list: &[SocketHandle], all: bool) -> Result<Vec<ConnectionEvent>> {
        if !self.is_listening() {
            return Err(Error::connection_msg("server socket is not listening"));
        }
        let listener = self.listener()?;
        let mut events = Vec::new();

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    tracing::debug!("🤝 Accepted connection from {}", peer);
                    events.push(ConnectionEvent::Accepted(AcceptedSocket::new(stream, peer)));
                    if !all {
                        return Ok(events);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::connection("accept failed", e)),
            }
        }

        let mut peeked_byte = [0u8; 1];
        for handle in master_list {
            let Some(stream) = handle.stream() else {
                continue;
            };
            let ready = if stream.set_nonblocking(true).is_err() {
                // A descriptor that cannot be configured is unusable; report it
                // so the owner reads, fails and drops it.
                true
            } else {
                let peeked = stream.peek(&mut peeked_byte);
                stream.set_nonblocking(false)?;
                // data, orderly close or a connection error
                !matches!(
                    peeked,
                    Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted
                )
            };
            if ready {
                events.push(ConnectionEvent::Activity(handle.clone()));
                if !all {
                    break;
                }
            }
        }
        Ok(events)
    }
}

impl Deref for ServerSocket {
    type Target = Socket;

    fn deref(&self) -> &Socket {
        &self.socket
    }
}

impl DerefMut for ServerSocket {
    fn deref_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{ClientSocket, TempSocket};

    fn listening_server() -> ServerSocket {
        let mut server = ServerSocket::new();
        server.create_socket_at("127.0.0.1", 0).unwrap();
        server.listen_connection(16).unwrap();
        server
    }

    fn accept(server: &ServerSocket) -> AcceptedSocket {
        match server
            .wait_for_connection_event_timeout(&[], Duration::from_secs(5))
            .unwrap()
        {
            Some(ConnectionEvent::Accepted(accepted)) => accepted,
            other => panic!("expected accepted connection, got {other:?}"),
        }
    }

    #[test]
    fn test_listen_queue_is_clamped() {
        let mut server = listening_server();
        assert_eq!(server.listen_queue(), 16);
        server.listen_connection(10_000).unwrap();
        assert_eq!(server.listen_queue(), MAXIMUM_LISTEN_QUEUE_SIZE);
        server.listen_connection(0).unwrap();
        assert_eq!(server.listen_queue(), MAXIMUM_LISTEN_QUEUE_SIZE);
    }

    #[test]
    fn test_listen_requires_bound_socket() {
        let mut server = ServerSocket::new();
        assert!(server.listen_connection(1).is_err());
        assert!(server.wait_for_connection_event(&[]).is_err());
    }

    #[test]
    fn test_accept_then_activity_on_data() {
        let server = listening_server();
        let port = server.address().port();
        assert_ne!(port, 0);

        let mut client = ClientSocket::new();
        client.create_socket_at("127.0.0.1", port).unwrap();
        let accepted = accept(&server);
        assert!(accepted.create_socket());

        let payload = [7u8; 100];
        assert_eq!(client.send_data(&payload).unwrap(), 100);

        let master = vec![accepted.handle().unwrap().clone()];
        match server
            .wait_for_connection_event_timeout(&master, Duration::from_secs(5))
            .unwrap()
        {
            Some(ConnectionEvent::Activity(handle)) => assert_eq!(&handle, &master[0]),
            other => panic!("expected activity, got {other:?}"),
        }

        let mut received = [0u8; 100];
        assert!(accepted.receive_exact(&mut received).unwrap());
        assert_eq!(received, payload);
    }

    #[test]
    fn test_activity_on_peer_close_reads_zero() {
        let server = listening_server();
        let port = server.address().port();
        let mut client = ClientSocket::new();
        client.create_socket_at("127.0.0.1", port).unwrap();
        let accepted = server.accept_connection().unwrap();
        assert_eq!(accepted.peer_address().socket_addr(), client.handle().unwrap().stream().unwrap().local_addr().ok());

        client.close_socket();
        assert!(!client.is_valid());

        let master = vec![accepted.handle().unwrap().clone()];
        let event = server
            .wait_for_connection_event_timeout(&master, Duration::from_secs(5))
            .unwrap();
        assert!(matches!(event, Some(ConnectionEvent::Activity(_))));
        let mut buf = [0u8; 8];
        assert_eq!(accepted.receive_data(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_wait_times_out_without_events() {
        let server = listening_server();
        let event = server
            .wait_for_connection_event_timeout(&[], Duration::from_millis(30))
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_copies_share_descriptor() {
        let server = listening_server();
        let port = server.address().port();
        let mut client = ClientSocket::new();
        client.create_socket_at("127.0.0.1", port).unwrap();
        let _accepted = accept(&server);

        let mut copy = client.clone();
        assert_eq!(client.lock_count(), 2);
        let temp = TempSocket::new(&client);
        assert_eq!(client.lock_count(), 2);

        copy.close_socket();
        assert_eq!(client.lock_count(), 1);
        assert_eq!(temp.send_data(b"ping").unwrap(), 4);

        client.close_socket();
        assert!(!temp.is_valid());
        assert!(temp.send_data(b"ping").is_err());
    }

    #[test]
    fn test_changing_address_closes_socket() {
        let server = listening_server();
        let port = server.address().port();
        let mut client = ClientSocket::new();
        client.create_socket_at("127.0.0.1", port).unwrap();
        assert!(client.is_valid());

        assert!(client.set_address("127.0.0.1", port));
        assert!(client.is_valid());
        client.set_address("127.0.0.1", port.wrapping_add(1).max(1));
        assert!(!client.is_valid());
    }

    #[test]
    fn test_invalid_socket_io_fails() {
        let client = ClientSocket::new();
        assert!(client.send_data(b"x").is_err());
        let mut buf = [0u8; 1];
        assert!(client.receive_data(&mut buf).is_err());
        assert_eq!(client.lock_count(), 0);
    }

    #[test]
    fn test_every_active_connection_reported_together() {
        let server = listening_server();
        let port = server.address().port();
        let mut first = ClientSocket::new();
        first.create_socket_at("127.0.0.1", port).unwrap();
        let mut second = ClientSocket::new();
        second.create_socket_at("127.0.0.1", port).unwrap();

        let mut accepted = Vec::new();
        while accepted.len() < 2 {
            for event in server
                .wait_for_connection_events_timeout(&[], Duration::from_secs(5))
                .unwrap()
            {
                match event {
                    ConnectionEvent::Accepted(socket) => accepted.push(socket),
                    other => panic!("expected accepted connection, got {other:?}"),
                }
            }
        }
        let master: Vec<SocketHandle> = accepted
            .iter()
            .map(|socket| socket.handle().unwrap().clone())
            .collect();

        // The first connection stays busy; the second must still be reported
        first.send_data(&[1u8; 4096]).unwrap();
        second.send_data(b"ping").unwrap();
        thread::sleep(Duration::from_millis(50));
        let events = server
            .wait_for_connection_events_timeout(&master, Duration::from_secs(5))
            .unwrap();
        let active: Vec<&SocketHandle> = events
            .iter()
            .filter_map(|event| match event {
                ConnectionEvent::Activity(handle) => Some(handle),
                ConnectionEvent::Accepted(_) => None,
            })
            .collect();
        assert_eq!(active.len(), 2);
        assert!(active.contains(&&master[0]));
        assert!(active.contains(&&master[1]));

        let second_local = second.handle().unwrap().stream().unwrap().local_addr().ok();
        let quiet = accepted
            .iter()
            .find(|socket| socket.peer_address().socket_addr() == second_local)
            .unwrap();
        let mut received = [0u8; 16];
        assert_eq!(quiet.receive_available(&mut received).unwrap(), Some(4));
        assert_eq!(&received[..4], b"ping");
        assert_eq!(quiet.receive_available(&mut received).unwrap(), None);
    }
}
