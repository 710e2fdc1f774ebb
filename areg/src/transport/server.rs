//! Message router: the broker every remote-capable process connects to

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{write_frame, FrameReader, RouterMessage};
use crate::address::{Channel, StubAddress};
use crate::config::RemoteConfig;
use crate::event::{EventData, RemoteEvent, ResponseEvent};
use crate::message::ResultType;
use crate::socket::{AcceptedSocket, ConnectionEvent, ServerSocket, SocketAddress, SocketHandle};
use crate::sync::{lock_state, InterlockedValue, Lockable, Semaphore, SyncEvent};
use crate::{Error, Result};

const WAIT_SLICE: Duration = Duration::from_millis(50);
/// A peer that stops reading is dropped once a send blocks this long
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 16 * 1024;
/// Bytes read from one peer per wake-up before the others get their turn
const READ_BUDGET: usize = 16 * READ_CHUNK;

struct Peer {
    socket: AcceptedSocket,
    frames: FrameReader,
    name: String,
    connected: bool,
}

impl Peer {
    /// Read what has arrived without blocking and split off complete frames.
    /// The flag turns false once the peer closed its side.
    fn receive(&mut self) -> (Vec<RouterMessage>, Result<bool>) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut budget = READ_BUDGET;
        let mut status = Ok(true);
        while budget > 0 {
            match self.socket.receive_available(&mut chunk) {
                Ok(Some(0)) => {
                    status = Ok(false);
                    break;
                }
                Ok(Some(n)) => {
                    self.frames.extend(&chunk[..n]);
                    budget = budget.saturating_sub(n);
                }
                Ok(None) => break,
                Err(e) => {
                    status = Err(e);
                    break;
                }
            }
        }

        let mut messages = Vec::new();
        loop {
            match self.frames.next_frame() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(e) => return (messages, Err(e)),
            }
        }
        if matches!(status, Ok(false)) && self.frames.pending() > 0 {
            tracing::debug!(
                "{} closed with {} bytes of an incomplete frame",
                self.socket.peer_address(),
                self.frames.pending()
            );
        }
        (messages, status)
    }
}

struct Shared {
    stop: SyncEvent,
    running: AtomicBool,
    peers: InterlockedValue,
}

/// Router listening on a TCP endpoint.
///
/// Assigns every connecting process a cookie, forwards service events by the
/// cookie of their target channel and announces public stubs to every other
/// process. Runs on its own thread until [`stop`](Self::stop) or drop.
pub struct RouterServer {
    address: SocketAddress,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RouterServer {
    /// Bind the configured endpoint and start routing
    pub fn start(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;
        let mut server = ServerSocket::new();
        server.set_poll_interval(config.poll_interval());
        server.create_socket_at(&config.host, config.port)?;
        server.listen_connection(config.listen_queue)?;
        let address = server.address().clone();

        let shared = Arc::new(Shared {
            stop: SyncEvent::manual(false),
            running: AtomicBool::new(true),
            peers: InterlockedValue::new(0),
        });
        let router = Router {
            server,
            peers: HashMap::new(),
            stubs: Vec::new(),
            dead: Vec::new(),
            next_cookie: Channel::COOKIE_FIRST_REMOTE,
            slots: Semaphore::new(config.max_connections, config.max_connections),
            shared: shared.clone(),
        };
        let thread = thread::Builder::new()
            .name("areg-router".to_string())
            .spawn(move || router.run())
            .map_err(|e| Error::runtime("failed to spawn router thread", e))?;

        tracing::info!("🚀 Message router listening on {}", address);
        Ok(Self {
            address,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Bound endpoint, with the real port when port 0 was requested
    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Processes currently connected
    pub fn connection_count(&self) -> u64 {
        self.shared.peers.get()
    }

    /// Disconnect every process and stop the router thread
    pub fn stop(&self) {
        self.shared.stop.set();
        let thread = lock_state(&self.thread).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Router thread panicked");
            }
        }
    }
}

impl Drop for RouterServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Router {
    server: ServerSocket,
    peers: HashMap<u64, Peer>,
    /// Public stubs, channel pointing at the hosting process
    stubs: Vec<StubAddress>,
    /// Peers whose socket failed and must be dropped
    dead: Vec<u64>,
    next_cookie: u64,
    slots: Semaphore,
    shared: Arc<Shared>,
}

impl Router {
    fn run(mut self) {
        while !self.shared.stop.is_signaled() {
            let handles: Vec<SocketHandle> = self
                .peers
                .values()
                .filter_map(|peer| peer.socket.handle().cloned())
                .collect();
            match self
                .server
                .wait_for_connection_events_timeout(&handles, WAIT_SLICE)
            {
                Ok(events) => {
                    for event in events {
                        match event {
                            ConnectionEvent::Accepted(socket) => self.accept(socket),
                            ConnectionEvent::Activity(handle) => self.service(&handle),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("❌ Router wait failed: {}", e);
                    break;
                }
            }
            self.reap();
        }

        for (cookie, peer) in self.peers.drain() {
            tracing::debug!("Closing connection of {} ({})", peer.name, cookie);
            peer.socket.shutdown();
        }
        self.shared.peers.set(0);
        self.shared.running.store(false, Ordering::Release);
        tracing::info!("🛑 Message router stopped");
    }

    fn accept(&mut self, mut socket: AcceptedSocket) {
        if !self.slots.try_lock() {
            tracing::warn!(
                "⚠️ Refusing {}: connection limit reached",
                socket.peer_address()
            );
            socket.close_socket();
            return;
        }
        if let Err(e) = socket.set_send_timeout(Some(SEND_TIMEOUT)) {
            tracing::warn!("⚠️ Refusing {}: {}", socket.peer_address(), e);
            socket.close_socket();
            self.slots.unlock();
            return;
        }
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        tracing::debug!("Accepted {} as cookie {}", socket.peer_address(), cookie);
        self.peers.insert(
            cookie,
            Peer {
                socket,
                frames: FrameReader::new(),
                name: String::new(),
                connected: false,
            },
        );
        self.shared.peers.increment();
    }

    fn service(&mut self, handle: &SocketHandle) {
        let Some(cookie) = self
            .peers
            .iter()
            .find(|(_, peer)| peer.socket.handle() == Some(handle))
            .map(|(cookie, _)| *cookie)
        else {
            return;
        };
        if self.dead.contains(&cookie) {
            return;
        }
        let (messages, status) = match self.peers.get_mut(&cookie) {
            Some(peer) => peer.receive(),
            None => return,
        };
        for message in messages {
            if self.dead.contains(&cookie) {
                break;
            }
            self.handle_message(cookie, message);
        }
        match status {
            Ok(true) => {}
            Ok(false) => self.dead.push(cookie),
            Err(e) => {
                tracing::warn!("Dropping connection {}: {}", cookie, e);
                self.dead.push(cookie);
            }
        }
    }

    fn handle_message(&mut self, cookie: u64, message: RouterMessage) {
        let connected = self.peers.get(&cookie).is_some_and(|peer| peer.connected);
        match message {
            RouterMessage::Connect { name, instance } => {
                if let Some(peer) = self.peers.get_mut(&cookie) {
                    tracing::info!("🔗 Process '{}' ({}) connected as {}", name, instance, cookie);
                    peer.name = name;
                    peer.connected = true;
                }
                self.send_to(cookie, &RouterMessage::ConnectAccepted { cookie });
                let known: Vec<StubAddress> = self
                    .stubs
                    .iter()
                    .filter(|stub| stub.channel.cookie != cookie)
                    .cloned()
                    .collect();
                for stub in known {
                    self.send_to(cookie, &RouterMessage::StubAvailable(stub));
                }
            }
            _ if !connected => {
                tracing::warn!("Connection {} sent data before connecting", cookie);
                self.dead.push(cookie);
            }
            RouterMessage::RegisterStub(stub) => {
                let stub = stub.with_channel(hosted_by(cookie));
                if !self.stubs.contains(&stub) {
                    tracing::debug!("Registered public {}", stub);
                    self.stubs.push(stub.clone());
                    self.broadcast(cookie, &RouterMessage::StubAvailable(stub));
                }
            }
            RouterMessage::UnregisterStub(stub) => {
                let stub = stub.with_channel(hosted_by(cookie));
                if let Some(index) = self.stubs.iter().position(|known| *known == stub) {
                    self.stubs.remove(index);
                    tracing::debug!("Unregistered public {}", stub);
                    self.broadcast(cookie, &RouterMessage::StubUnavailable(stub));
                }
            }
            RouterMessage::Event(event) => self.forward(cookie, event),
            other => tracing::warn!("Unexpected message from {}: {:?}", cookie, other),
        }
    }

    fn forward(&mut self, from: u64, mut event: RemoteEvent) {
        let target = event.target_channel().cookie;
        event.set_source_channel(Channel::remote(from, target, from));

        let reachable = target != from
            && self.peers.get(&target).is_some_and(|peer| peer.connected);
        if reachable && self.send_to(target, &RouterMessage::Event(event.clone())) {
            return;
        }

        match event {
            RemoteEvent::Request(request) => {
                tracing::debug!("Request {} to {} undelivered", request.msg_id(), target);
                let reply = ResponseEvent::new(
                    request.source().clone(),
                    request.target().clone(),
                    request.msg_id(),
                    ResultType::MessageUndelivered,
                    request.seq_nr,
                    EventData::new(),
                );
                self.send_to(from, &RouterMessage::Event(RemoteEvent::Response(reply)));
            }
            _ => tracing::debug!("Dropping event for unreachable process {}", target),
        }
    }

    fn send_to(&mut self, cookie: u64, message: &RouterMessage) -> bool {
        let Some(peer) = self.peers.get(&cookie) else {
            return false;
        };
        match write_frame(&peer.socket, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Send to {} failed: {}", cookie, e);
                self.dead.push(cookie);
                false
            }
        }
    }

    fn broadcast(&mut self, except: u64, message: &RouterMessage) {
        let targets: Vec<u64> = self
            .peers
            .iter()
            .filter(|(cookie, peer)| **cookie != except && peer.connected)
            .map(|(cookie, _)| *cookie)
            .collect();
        for cookie in targets {
            self.send_to(cookie, message);
        }
    }

    fn reap(&mut self) {
        while let Some(cookie) = self.dead.pop() {
            let Some(mut peer) = self.peers.remove(&cookie) else {
                continue;
            };
            peer.socket.close_socket();
            self.slots.unlock();
            self.shared.peers.decrement();
            tracing::info!("Process '{}' ({}) disconnected", peer.name, cookie);

            let (lost, kept): (Vec<StubAddress>, Vec<StubAddress>) = self
                .stubs
                .drain(..)
                .partition(|stub| stub.channel.cookie == cookie);
            self.stubs = kept;
            for stub in lost {
                self.broadcast(cookie, &RouterMessage::StubUnavailable(stub));
            }
            if peer.connected {
                self.broadcast(cookie, &RouterMessage::PeerDisconnected { cookie });
            }
        }
    }
}

/// Channel recorded for stubs hosted by the process with `cookie`
fn hosted_by(cookie: u64) -> Channel {
    Channel::remote(cookie, Channel::COOKIE_ROUTER, cookie)
}
