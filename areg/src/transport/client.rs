//! Bridge between a process hub and the message router

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use once_cell::sync::OnceCell;
use uuid::Uuid;

use super::{peer_channel, read_frame, write_frame, RouterMessage};
use crate::address::{Channel, StubAddress};
use crate::config::RemoteConfig;
use crate::dispatcher::ChannelLoss;
use crate::event::RemoteEvent;
use crate::hub::WeakProcessHub;
use crate::socket::ClientSocket;
use crate::sync::{
    lock_state, InterlockedValue, MultiLock, SyncEvent, Timeout, Waitable, WaitableTimer,
    WAIT_INFINITE,
};
use crate::{Error, Result};

struct ClientInner {
    config: RemoteConfig,
    hub: WeakProcessHub,
    name: String,
    instance: Uuid,
    /// Writer copy of the connected socket
    socket: Mutex<Option<ClientSocket>>,
    /// Cookie assigned by the router, 0 while disconnected
    cookie: InterlockedValue,
    connected: SyncEvent,
    stop: SyncEvent,
    reconnect: WaitableTimer,
    /// Public local stubs, announced again after every reconnect
    public: Mutex<Vec<StubAddress>>,
    thread_id: OnceCell<ThreadId>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Connection of one process to the message router.
///
/// A background thread connects, performs the handshake, feeds received
/// events into the hub and reconnects after the connection drops.
#[derive(Clone)]
pub struct RouterClient {
    inner: Arc<ClientInner>,
}

impl RouterClient {
    pub(crate) fn start(config: RemoteConfig, hub: WeakProcessHub) -> Result<Self> {
        let process = hub
            .upgrade()
            .ok_or_else(|| Error::runtime_msg("process hub is gone"))?;
        let inner = Arc::new(ClientInner {
            config,
            hub,
            name: process.name().to_string(),
            instance: process.id(),
            socket: Mutex::new(None),
            cookie: InterlockedValue::new(0),
            connected: SyncEvent::manual(false),
            stop: SyncEvent::manual(false),
            reconnect: WaitableTimer::new(),
            public: Mutex::new(Vec::new()),
            thread_id: OnceCell::new(),
            thread: Mutex::new(None),
        });

        let worker = inner.clone();
        let thread = thread::Builder::new()
            .name(format!("areg-bridge-{}", inner.name))
            .spawn(move || run(worker))
            .map_err(|e| Error::runtime("failed to spawn router bridge", e))?;
        let _ = inner.thread_id.set(thread.thread().id());
        *lock_state(&inner.thread) = Some(thread);
        Ok(Self { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.cookie.get() != 0
    }

    /// Cookie the router assigned to this process
    pub fn cookie(&self) -> Option<u64> {
        match self.inner.cookie.get() {
            0 => None,
            cookie => Some(cookie),
        }
    }

    /// Block until the handshake completed or `timeout` expires
    pub fn wait_connected(&self, timeout: Timeout) -> bool {
        self.inner.connected.wait(timeout)
    }

    /// Send a service event to the process its target channel points at
    pub fn send_event(&self, mut event: RemoteEvent) -> Result<()> {
        let own = self.inner.cookie.get();
        if own == 0 {
            return Err(Error::connection_msg("not connected to the message router"));
        }
        let target = event.target_channel();
        if !target.is_remote() {
            return Err(Error::invalid_request(
                "event target is not remote",
                Some(target.to_string()),
            ));
        }
        event.set_source_channel(Channel::remote(own, target.cookie, own));
        send(&self.inner, &RouterMessage::Event(event))
    }

    pub(crate) fn register_stub(&self, address: &StubAddress) {
        {
            let mut public = lock_state(&self.inner.public);
            if public.contains(address) {
                return;
            }
            public.push(address.clone());
        }
        if self.is_connected() {
            if let Err(e) = send(&self.inner, &RouterMessage::RegisterStub(address.clone())) {
                tracing::warn!("Cannot announce {}: {}", address, e);
            }
        }
    }

    pub(crate) fn unregister_stub(&self, address: &StubAddress) {
        let removed = {
            let mut public = lock_state(&self.inner.public);
            let before = public.len();
            public.retain(|known| known != address);
            public.len() != before
        };
        if removed && self.is_connected() {
            if let Err(e) = send(&self.inner, &RouterMessage::UnregisterStub(address.clone())) {
                tracing::debug!("Cannot withdraw {}: {}", address, e);
            }
        }
    }

    /// Close the connection and stop reconnecting
    pub fn stop(&self) {
        if self.inner.stop.is_signaled() {
            return;
        }
        self.inner.stop.set();
        if let Some(socket) = lock_state(&self.inner.socket).as_ref() {
            socket.shutdown();
        }
        if self.inner.thread_id.get() == Some(&thread::current().id()) {
            return;
        }
        let thread = lock_state(&self.inner.thread).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Router bridge thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for RouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterClient")
            .field("router", &format_args!("{}:{}", self.inner.config.host, self.inner.config.port))
            .field("cookie", &self.inner.cookie.get())
            .finish()
    }
}

fn send(inner: &ClientInner, message: &RouterMessage) -> Result<()> {
    let socket = lock_state(&inner.socket);
    match socket.as_ref() {
        Some(socket) => write_frame(socket, message),
        None => Err(Error::connection_msg("not connected to the message router")),
    }
}

fn run(inner: Arc<ClientInner>) {
    loop {
        if inner.stop.is_signaled() {
            break;
        }
        match connect(&inner) {
            Ok(socket) => {
                receive(&inner, &socket);
                connection_lost(&inner);
            }
            Err(e) if e.is_retryable() => tracing::debug!(
                "Router {}:{} unreachable: {}",
                inner.config.host,
                inner.config.port,
                e
            ),
            Err(e) => tracing::warn!(
                "⚠️ Router {}:{} refused the handshake: {}",
                inner.config.host,
                inner.config.port,
                e
            ),
        }

        inner
            .reconnect
            .start(inner.config.reconnect_interval(), false);
        let objects: [&dyn Waitable; 2] = [&inner.stop, &inner.reconnect];
        let wait = MultiLock::wait_any(&objects, WAIT_INFINITE);
        if wait.is_acquired(0) {
            break;
        }
    }
    inner.reconnect.stop();
    tracing::debug!("Router bridge of '{}' stopped", inner.name);
}

fn connect(inner: &ClientInner) -> Result<ClientSocket> {
    let mut socket = ClientSocket::new();
    socket.create_socket_at(&inner.config.host, inner.config.port)?;
    write_frame(
        &socket,
        &RouterMessage::Connect {
            name: inner.name.clone(),
            instance: inner.instance,
        },
    )?;
    let cookie = match read_frame(&socket)? {
        Some(RouterMessage::ConnectAccepted { cookie }) => cookie,
        other => {
            return Err(Error::protocol(
                "unexpected handshake reply",
                Some("ConnectAccepted".to_string()),
                Some(format!("{other:?}")),
            ))
        }
    };

    *lock_state(&inner.socket) = Some(socket.clone());
    if inner.stop.is_signaled() {
        socket.shutdown();
        return Err(Error::connection_msg("router bridge stopped"));
    }
    inner.cookie.set(cookie);
    inner.connected.set();
    tracing::info!(
        "🔗 '{}' connected to router {} as {}",
        inner.name,
        socket.address(),
        cookie
    );

    let public = lock_state(&inner.public).clone();
    for address in public {
        if let Err(e) = send(inner, &RouterMessage::RegisterStub(address)) {
            tracing::warn!("Cannot announce public stub: {}", e);
        }
    }
    Ok(socket)
}

fn receive(inner: &ClientInner, socket: &ClientSocket) {
    loop {
        match read_frame(socket) {
            Ok(Some(message)) => dispatch(inner, message),
            Ok(None) => {
                tracing::info!("Router closed the connection");
                break;
            }
            Err(e) => {
                if !inner.stop.is_signaled() {
                    tracing::warn!("⚠️ Router connection failed: {}", e);
                }
                break;
            }
        }
    }
}

fn dispatch(inner: &ClientInner, message: RouterMessage) {
    let Some(hub) = inner.hub.upgrade() else {
        return;
    };
    let own = inner.cookie.get();
    match message {
        RouterMessage::Event(mut event) => {
            let source = event.source_channel();
            event.set_target_channel(Channel::LOCAL);
            event.set_source_channel(peer_channel(source.cookie, own));
            match event {
                RemoteEvent::Request(request) => hub.send_request_event(request),
                RemoteEvent::NotifyRequest(request) => hub.send_notify_request_event(request),
                RemoteEvent::Response(response) => hub.send_response_event(response),
            }
        }
        RouterMessage::StubAvailable(stub) if stub.channel.cookie != own => {
            let channel = peer_channel(stub.channel.cookie, own);
            hub.remote_stub_available(stub.with_channel(channel));
        }
        RouterMessage::StubUnavailable(stub) if stub.channel.cookie != own => {
            let channel = peer_channel(stub.channel.cookie, own);
            hub.remote_stub_unavailable(&stub.with_channel(channel));
        }
        RouterMessage::PeerDisconnected { cookie } => {
            tracing::debug!("Process {} left the router", cookie);
            hub.channel_lost(ChannelLoss::Peer(cookie));
        }
        RouterMessage::StubAvailable(_) | RouterMessage::StubUnavailable(_) => {}
        other => tracing::warn!("Unexpected router message: {:?}", other),
    }
}

fn connection_lost(inner: &ClientInner) {
    if let Some(mut socket) = lock_state(&inner.socket).take() {
        socket.shutdown();
        socket.close_socket();
    }
    inner.cookie.set(0);
    inner.connected.reset();
    if !inner.stop.is_signaled() {
        tracing::warn!("⚠️ '{}' lost the router connection", inner.name);
    }
    if let Some(hub) = inner.hub.upgrade() {
        hub.channel_lost(ChannelLoss::Router);
    }
}
