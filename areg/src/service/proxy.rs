//! Proxy (service consumer) runtime

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::address::{ProxyAddress, StubAddress};
use crate::dispatcher::{ConsumerKind, DispatchContext, EventConsumer};
use crate::event::{
    ConnectionStatus, Event, EventData, NotifyRequestEvent, RequestEvent, ResponseEvent,
    ServiceConnectionEvent,
};
use crate::hub::WeakProcessHub;
use crate::interface::ServiceInterface;
use crate::message::{
    DataState, MessageId, RequestType, ResultType, SequenceCounter, SEQUENCE_NUMBER_NOTIFY,
};
use crate::sync::{lock_state, InterlockedValue, SyncEvent, Timeout};
use crate::{Error, Result};

/// Identifies a client attached to a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// Callbacks of a proxy user, invoked on the proxy's dispatcher thread
pub trait ProxyClient: Send + Sync {
    /// The stub became available or went away
    fn service_connected(&self, _proxy: &Proxy, _connected: bool) {}

    /// Response to one of this client's requests, or a notification it
    /// subscribed to
    fn process_response(&self, proxy: &Proxy, response: &ResponseEvent);
}

enum Waiter {
    Client(ClientId),
    Async(oneshot::Sender<ResponseEvent>),
    Blocking(std::sync::mpsc::Sender<ResponseEvent>),
}

struct Pending {
    msg_id: MessageId,
    waiter: Waiter,
}

struct ClientEntry {
    id: ClientId,
    client: Arc<dyn ProxyClient>,
    /// Whether the client was told the service is connected
    notified: bool,
}

#[derive(Default)]
struct ProxyState {
    stub: Option<StubAddress>,
    clients: Vec<ClientEntry>,
    pending: HashMap<u32, Pending>,
    subscriptions: Vec<(MessageId, ClientId)>,
    attributes: HashMap<MessageId, (DataState, EventData)>,
    closed: bool,
}

impl ProxyState {
    fn is_subscribed(&self, msg_id: MessageId) -> bool {
        self.subscriptions.iter().any(|(id, _)| *id == msg_id)
    }

    fn client(&self, id: ClientId) -> Option<Arc<dyn ProxyClient>> {
        self.clients
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.client.clone())
    }
}

struct ProxyInner {
    address: ProxyAddress,
    interface: Arc<ServiceInterface>,
    hub: WeakProcessHub,
    seq: SequenceCounter,
    next_client: InterlockedValue,
    state: std::sync::Mutex<ProxyState>,
    /// Signaled while bound to a stub
    connected: SyncEvent,
}

/// Shared handle to the proxy of a service role on one thread.
///
/// Requests may be sent from any thread; responses and availability changes
/// are processed on the proxy's dispatcher thread.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("address", &self.inner.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Completion of a request: the response to deliver and who receives it
enum Delivery {
    Client(Arc<dyn ProxyClient>, ResponseEvent),
    Async(oneshot::Sender<ResponseEvent>, ResponseEvent),
    Blocking(std::sync::mpsc::Sender<ResponseEvent>, ResponseEvent),
}

impl Proxy {
    pub(crate) fn new(
        address: ProxyAddress,
        interface: Arc<ServiceInterface>,
        hub: WeakProcessHub,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                address,
                interface,
                hub,
                seq: SequenceCounter::new(),
                next_client: InterlockedValue::new(0),
                state: std::sync::Mutex::new(ProxyState::default()),
                connected: SyncEvent::manual(false),
            }),
        }
    }

    pub fn address(&self) -> &ProxyAddress {
        &self.inner.address
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.inner.interface
    }

    pub fn is_connected(&self) -> bool {
        lock_state(&self.inner.state).stub.is_some()
    }

    /// Block until the proxy is bound to its stub or `timeout` expires
    pub fn wait_connected(&self, timeout: Timeout) -> bool {
        self.inner.connected.wait(timeout)
    }

    /// Address of the bound stub while connected
    pub fn stub_address(&self) -> Option<StubAddress> {
        lock_state(&self.inner.state).stub.clone()
    }

    pub fn client_count(&self) -> usize {
        lock_state(&self.inner.state).clients.len()
    }

    /// Attach a client. If the service is already connected the client is
    /// told so on the proxy's thread.
    pub fn register_client(&self, client: Arc<dyn ProxyClient>) -> ClientId {
        let id = ClientId(self.inner.next_client.increment());
        let stub = {
            let mut state = lock_state(&self.inner.state);
            state.clients.push(ClientEntry {
                id,
                client,
                notified: false,
            });
            state.stub.clone()
        };
        if let (Some(stub), Some(hub)) = (stub, self.inner.hub.upgrade()) {
            hub.post_connection_event(ServiceConnectionEvent::new(
                self.inner.address.clone(),
                stub,
                ConnectionStatus::Connected,
            ));
        }
        id
    }

    /// Detach a client, dropping its unanswered requests and subscriptions
    pub fn unregister_client(&self, client: ClientId) {
        let stopped: Vec<MessageId> = {
            let mut state = lock_state(&self.inner.state);
            state.clients.retain(|entry| entry.id != client);
            state
                .pending
                .retain(|_, pending| !matches!(pending.waiter, Waiter::Client(id) if id == client));
            let ids: Vec<MessageId> = state
                .subscriptions
                .iter()
                .filter(|(_, id)| *id == client)
                .map(|(msg_id, _)| *msg_id)
                .collect();
            state.subscriptions.retain(|(_, id)| *id != client);
            ids.into_iter()
                .filter(|msg_id| !state.is_subscribed(*msg_id))
                .collect()
        };
        for msg_id in stopped {
            self.send_notify(msg_id, RequestType::StopNotify);
        }
    }

    /// Send a function call for `client` and return its sequence number.
    /// The answer arrives through [`ProxyClient::process_response`].
    pub fn request(&self, client: ClientId, msg_id: MessageId, data: EventData) -> Result<u32> {
        self.send_call(msg_id, data, |_| Waiter::Client(client))
    }

    /// Awaitable call: resolves with the successful response, or fails with
    /// the result code, or with a timeout after `timeout`
    pub async fn call(
        &self,
        msg_id: MessageId,
        data: EventData,
        timeout: Duration,
    ) -> Result<ResponseEvent> {
        self.expect_response(msg_id)?;
        let (tx, rx) = oneshot::channel();
        let seq = self.send_call(msg_id, data, move |_| Waiter::Async(tx))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Self::into_result(response),
            Ok(Err(_)) => Err(Error::request_failed(msg_id.0, ResultType::RequestCanceled)),
            Err(_) => {
                lock_state(&self.inner.state).pending.remove(&seq);
                Err(Error::timeout(
                    format!("call {msg_id} on {}", self.inner.address),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Blocking variant of [`call`](Self::call). Must not be used on the
    /// proxy's own dispatcher thread.
    pub fn call_blocking(
        &self,
        msg_id: MessageId,
        data: EventData,
        timeout: Duration,
    ) -> Result<ResponseEvent> {
        if std::thread::current().name() == Some(self.inner.address.thread.as_str()) {
            return Err(Error::runtime_msg(format!(
                "blocking call on dispatcher thread '{}' would never complete",
                self.inner.address.thread
            )));
        }
        self.expect_response(msg_id)?;
        let (tx, rx) = std::sync::mpsc::channel();
        let seq = self.send_call(msg_id, data, move |_| Waiter::Blocking(tx))?;

        match rx.recv_timeout(timeout) {
            Ok(response) => Self::into_result(response),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::request_failed(msg_id.0, ResultType::RequestCanceled))
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                lock_state(&self.inner.state).pending.remove(&seq);
                Err(Error::timeout(
                    format!("call {msg_id} on {}", self.inner.address),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    fn expect_response(&self, msg_id: MessageId) -> Result<()> {
        let interface = &self.inner.interface;
        if !interface.is_request(msg_id) {
            return Err(Error::unknown_message(interface.name(), msg_id.0));
        }
        if interface.response_of(msg_id).is_none() {
            return Err(Error::invalid_request(
                format!("request {msg_id} has no response to wait for"),
                Some(self.inner.interface.name().to_string()),
            ));
        }
        Ok(())
    }

    fn into_result(response: ResponseEvent) -> Result<ResponseEvent> {
        if response.result().is_success() {
            Ok(response)
        } else {
            Err(Error::request_failed(response.msg_id().0, response.result()))
        }
    }

    fn send_call(
        &self,
        msg_id: MessageId,
        data: EventData,
        waiter: impl FnOnce(u32) -> Waiter,
    ) -> Result<u32> {
        let interface = &self.inner.interface;
        if !interface.is_request(msg_id) {
            return Err(Error::unknown_message(interface.name(), msg_id.0));
        }
        let hub = self
            .inner
            .hub
            .upgrade()
            .ok_or_else(|| Error::runtime_msg("process hub was dropped"))?;

        let seq = self.inner.seq.next();
        let target = {
            let mut state = lock_state(&self.inner.state);
            if state.closed {
                return Err(Error::service_lifecycle(
                    "proxy is shut down",
                    interface.name(),
                    "closed",
                ));
            }
            if interface.response_of(msg_id).is_some() {
                state.pending.insert(
                    seq,
                    Pending {
                        msg_id,
                        waiter: waiter(seq),
                    },
                );
            }
            state.stub.clone().unwrap_or_else(|| self.unbound_target())
        };

        tracing::trace!("{} sends {} (seq {})", self.inner.address, msg_id, seq);
        hub.send_request_event(RequestEvent::new(
            self.inner.address.clone(),
            target,
            msg_id,
            seq,
            data,
        ));
        Ok(seq)
    }

    /// Stub address used before the service is available; it never matches a
    /// registered stub, so the call is answered with `MessageUndelivered`
    fn unbound_target(&self) -> StubAddress {
        StubAddress::new(
            self.inner.interface.service_item(),
            self.inner.address.role.clone(),
            String::new(),
        )
    }

    /// Subscribe `client` to a response, broadcast or attribute, or cancel
    /// the subscription
    pub fn notify_on(&self, client: ClientId, msg_id: MessageId, enable: bool) -> Result<()> {
        let interface = &self.inner.interface;
        if !interface.is_response(msg_id) && !interface.is_attribute(msg_id) {
            return Err(Error::unknown_message(interface.name(), msg_id.0));
        }
        let send = {
            let mut state = lock_state(&self.inner.state);
            let was_subscribed = state.is_subscribed(msg_id);
            if enable {
                if !state.subscriptions.contains(&(msg_id, client)) {
                    state.subscriptions.push((msg_id, client));
                }
                (!was_subscribed).then_some(RequestType::StartNotify)
            } else {
                state.subscriptions.retain(|entry| *entry != (msg_id, client));
                (was_subscribed && !state.is_subscribed(msg_id)).then_some(RequestType::StopNotify)
            }
        };
        if let Some(request_type) = send {
            self.send_notify(msg_id, request_type);
        }
        Ok(())
    }

    /// Send a subscription change to the bound stub; skipped while
    /// disconnected since subscriptions are re-issued on connect
    fn send_notify(&self, msg_id: MessageId, request_type: RequestType) {
        let Some(stub) = self.stub_address() else {
            return;
        };
        let Some(hub) = self.inner.hub.upgrade() else {
            return;
        };
        match NotifyRequestEvent::new(self.inner.address.clone(), stub, msg_id, request_type) {
            Ok(request) => hub.send_notify_request_event(request),
            Err(e) => tracing::error!("Invalid notification request: {}", e),
        }
    }

    /// Cached attribute value, `None` while invalid
    pub fn attribute(&self, msg_id: MessageId) -> Option<EventData> {
        match lock_state(&self.inner.state).attributes.get(&msg_id) {
            Some((DataState::Valid, data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn attribute_state(&self, msg_id: MessageId) -> DataState {
        lock_state(&self.inner.state)
            .attributes
            .get(&msg_id)
            .map_or(DataState::Invalid, |(state, _)| *state)
    }

    /// Decoded attribute value, `None` while invalid
    pub fn attribute_value<T: DeserializeOwned>(&self, msg_id: MessageId) -> Result<Option<T>> {
        self.attribute(msg_id).map(|data| data.value()).transpose()
    }

    pub(crate) fn handle_event(&self, event: &Event) {
        match event {
            Event::Response(response) => self.handle_response(response),
            Event::Connection(connection) => match connection.status {
                ConnectionStatus::Connected => self.handle_connected(&connection.stub),
                ConnectionStatus::Disconnected => self.handle_disconnected(&connection.stub),
            },
            _ => {}
        }
    }

    fn handle_response(&self, response: &ResponseEvent) {
        let msg_id = response.msg_id();
        if response.seq_nr() != SEQUENCE_NUMBER_NOTIFY {
            let pending = lock_state(&self.inner.state).pending.remove(&response.seq_nr());
            let Some(pending) = pending else {
                tracing::trace!("{} got unexpected answer seq {}", self.inner.address, response.seq_nr());
                return;
            };
            if let Some(delivery) = self.delivery(pending.waiter, response.clone()) {
                self.deliver(delivery);
            }
            return;
        }

        let clients: Vec<Arc<dyn ProxyClient>> = {
            let mut state = lock_state(&self.inner.state);
            if self.inner.interface.is_attribute(msg_id) {
                let entry = if response.result() == ResultType::DataOK {
                    (DataState::Valid, response.data.clone())
                } else {
                    (DataState::Invalid, EventData::new())
                };
                state.attributes.insert(msg_id, entry);
            }
            let mut ids: Vec<ClientId> = state
                .subscriptions
                .iter()
                .filter(|(id, _)| *id == msg_id)
                .map(|(_, client)| *client)
                .collect();
            ids.dedup();
            ids.into_iter().filter_map(|id| state.client(id)).collect()
        };
        for client in clients {
            client.process_response(self, response);
        }
    }

    fn delivery(&self, waiter: Waiter, response: ResponseEvent) -> Option<Delivery> {
        match waiter {
            Waiter::Client(id) => {
                let client = lock_state(&self.inner.state).client(id)?;
                Some(Delivery::Client(client, response))
            }
            Waiter::Async(tx) => Some(Delivery::Async(tx, response)),
            Waiter::Blocking(tx) => Some(Delivery::Blocking(tx, response)),
        }
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Client(client, response) => client.process_response(self, &response),
            Delivery::Async(tx, response) => {
                let _ = tx.send(response);
            }
            Delivery::Blocking(tx, response) => {
                let _ = tx.send(response);
            }
        }
    }

    fn handle_connected(&self, stub: &StubAddress) {
        let required = self.inner.interface.version();
        if !stub.service.version.is_compatible(&required) {
            tracing::error!(
                "{} version {} is incompatible with {} (needs {})",
                stub,
                stub.service.version,
                self.inner.address,
                required
            );
            return;
        }

        let (rebound, subscribed, clients) = {
            let mut state = lock_state(&self.inner.state);
            if state.closed {
                return;
            }
            let rebound = state.stub.as_ref() != Some(stub);
            state.stub = Some(stub.clone());
            let mut subscribed: Vec<MessageId> =
                state.subscriptions.iter().map(|(id, _)| *id).collect();
            subscribed.sort();
            subscribed.dedup();
            let clients: Vec<Arc<dyn ProxyClient>> = state
                .clients
                .iter_mut()
                .filter(|entry| !entry.notified)
                .map(|entry| {
                    entry.notified = true;
                    entry.client.clone()
                })
                .collect();
            (rebound, subscribed, clients)
        };
        self.inner.connected.set();

        if rebound {
            tracing::info!("🔗 {} connected to {}", self.inner.address, stub);
            for msg_id in subscribed {
                self.send_notify(msg_id, RequestType::StartNotify);
            }
        }
        for client in clients {
            client.service_connected(self, true);
        }
    }

    fn handle_disconnected(&self, stub: &StubAddress) {
        let (canceled, clients) = {
            let mut state = lock_state(&self.inner.state);
            if state.stub.as_ref() != Some(stub) {
                return;
            }
            state.stub = None;
            self.inner.connected.reset();
            self.disconnect_locked(&mut state, stub)
        };
        tracing::info!("{} lost {}", self.inner.address, stub);
        for delivery in canceled {
            self.deliver(delivery);
        }
        for client in clients {
            client.service_connected(self, false);
        }
    }

    /// Invalidate attributes, cancel pending calls and collect the clients
    /// to tell about the disconnect
    fn disconnect_locked(
        &self,
        state: &mut ProxyState,
        stub: &StubAddress,
    ) -> (Vec<Delivery>, Vec<Arc<dyn ProxyClient>>) {
        for entry in state.attributes.values_mut() {
            *entry = (DataState::Invalid, EventData::new());
        }
        let pending: Vec<(u32, Pending)> = state.pending.drain().collect();
        let mut canceled = Vec::with_capacity(pending.len());
        for (seq, pending) in pending {
            let response = ResponseEvent::new(
                self.inner.address.clone(),
                stub.clone(),
                pending.msg_id,
                ResultType::RequestCanceled,
                seq,
                EventData::new(),
            );
            let delivery = match pending.waiter {
                Waiter::Client(id) => state.client(id).map(|client| Delivery::Client(client, response)),
                Waiter::Async(tx) => Some(Delivery::Async(tx, response)),
                Waiter::Blocking(tx) => Some(Delivery::Blocking(tx, response)),
            };
            canceled.extend(delivery);
        }
        let clients = state
            .clients
            .iter_mut()
            .filter(|entry| entry.notified)
            .map(|entry| {
                entry.notified = false;
                entry.client.clone()
            })
            .collect();
        (canceled, clients)
    }

    /// Cancel everything and leave the hub; the proxy cannot be used after
    pub(crate) fn shutdown(&self) {
        let (stub, canceled, clients) = {
            let mut state = lock_state(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            let stub = state.stub.clone();
            let placeholder = stub.clone().unwrap_or_else(|| self.unbound_target());
            let (canceled, clients) = self.disconnect_locked(&mut state, &placeholder);
            (stub, canceled, clients)
        };

        if stub.is_some() {
            self.send_notify(MessageId::INVALID, RequestType::RemoveAllNotify);
        }
        lock_state(&self.inner.state).stub = None;
        self.inner.connected.reset();

        for delivery in canceled {
            self.deliver(delivery);
        }
        for client in clients {
            client.service_connected(self, false);
        }
        if let Some(hub) = self.inner.hub.upgrade() {
            hub.remove_proxy(self);
        }
        tracing::debug!("Proxy {} shut down", self.inner.address);
    }
}

/// Hosts a proxy on its dispatcher thread
pub(crate) struct ProxyConsumer {
    proxy: Proxy,
}

impl ProxyConsumer {
    pub(crate) fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

impl EventConsumer for ProxyConsumer {
    fn process_event(&mut self, event: &Event, _ctx: &mut DispatchContext) {
        self.proxy.handle_event(event);
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Proxy
    }

    fn on_shutdown(&mut self, _ctx: &mut DispatchContext) {
        self.proxy.shutdown();
    }
}
