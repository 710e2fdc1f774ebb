//! ProcessHub - process-wide context for dispatching and routing

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use uuid::Uuid;

use crate::address::{ProxyAddress, StubAddress};
use crate::config::RemoteConfig;
use crate::dispatcher::{AddressFilter, ChannelLoss, DispatcherHandle, DispatcherThread, EventFilter};
use crate::event::{
    classes, ConnectionStatus, CustomEvent, Event, EventData, NotifyRequestEvent, RemoteEvent,
    RequestEvent, ResponseEvent, ServiceConnectionEvent,
};
use crate::interface::ServiceInterface;
use crate::message::ResultType;
use crate::rtti::ClassRegistry;
use crate::service::{Proxy, ProxyConsumer, ServiceStub, StubBase, StubConsumer};
use crate::sync::{ResourceLock, ResourceLockKind, ScopedLock};
use crate::transport::RouterClient;
use crate::{Error, Result};

/// Registry key of a service provider: the service name and the role
/// implementing it. A process hosts at most one stub per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service: String,
    pub role: String,
}

impl ServiceKey {
    pub fn new(service: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
        }
    }

    pub(crate) fn of_stub(address: &StubAddress) -> Self {
        Self::new(address.service.name.clone(), address.role.clone())
    }

    fn of_proxy(address: &ProxyAddress) -> Self {
        Self::new(address.service.name.clone(), address.role.clone())
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.service, self.role)
    }
}

#[derive(Debug)]
struct StubEntry {
    address: StubAddress,
    /// Set once the hosting thread has registered the stub
    available: bool,
}

struct HubInner {
    name: String,
    id: Uuid,
    /// Serializes compound updates across the registries
    lock: ResourceLock,
    dispatchers: DashMap<String, DispatcherHandle>,
    stubs: DashMap<ServiceKey, StubEntry>,
    remote_stubs: DashMap<ServiceKey, StubAddress>,
    proxies: DashMap<(ServiceKey, String), Proxy>,
    classes: ClassRegistry,
    router: OnceCell<RouterClient>,
    shut_down: AtomicBool,
}

/// Process-wide context: dispatcher threads, stub and proxy registries,
/// runtime classes and the optional router connection.
///
/// Clones share the same context. Call [`shutdown`](Self::shutdown) to stop
/// every thread; running dispatcher threads keep the context alive.
#[derive(Clone)]
pub struct ProcessHub {
    inner: Arc<HubInner>,
}

/// Non-owning reference to a [`ProcessHub`]
#[derive(Clone, Default)]
pub struct WeakProcessHub(Weak<HubInner>);

impl WeakProcessHub {
    pub fn upgrade(&self) -> Option<ProcessHub> {
        self.0.upgrade().map(|inner| ProcessHub { inner })
    }
}

impl fmt::Debug for WeakProcessHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakProcessHub")
    }
}

impl fmt::Debug for ProcessHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHub")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("threads", &self.inner.dispatchers.len())
            .field("stubs", &self.inner.stubs.len())
            .field("proxies", &self.inner.proxies.len())
            .finish()
    }
}

/// Builder for [`ProcessHub`]
#[derive(Debug, Clone)]
pub struct ProcessHubBuilder {
    name: String,
    remote: Option<RemoteConfig>,
    lock_kind: ResourceLockKind,
}

impl ProcessHubBuilder {
    /// Connect to a message router once built
    pub fn with_remote(mut self, config: RemoteConfig) -> Self {
        self.remote = Some(config);
        self
    }

    /// Lock used to serialize registry updates
    pub fn with_lock_kind(mut self, kind: ResourceLockKind) -> Self {
        self.lock_kind = kind;
        self
    }

    pub fn build(self) -> Result<ProcessHub> {
        if self.name.is_empty() {
            return Err(Error::configuration(
                "process name must not be empty",
                Some("name".to_string()),
            ));
        }
        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        let hub = ProcessHub::with_lock(&self.name, ResourceLock::with_kind(self.lock_kind));
        if let Some(remote) = self.remote {
            hub.connect_router(remote)?;
        }
        Ok(hub)
    }
}

impl ProcessHub {
    /// Create a hub without a router connection
    pub fn new(name: &str) -> Self {
        Self::with_lock(name, ResourceLock::new())
    }

    pub fn builder(name: &str) -> ProcessHubBuilder {
        ProcessHubBuilder {
            name: name.to_string(),
            remote: None,
            lock_kind: ResourceLockKind::CriticalSection,
        }
    }

    fn with_lock(name: &str, lock: ResourceLock) -> Self {
        let id = Uuid::new_v4();
        tracing::info!("🏗️ Creating ProcessHub '{}' ({})", name, id);
        Self {
            inner: Arc::new(HubInner {
                name: name.to_string(),
                id,
                lock,
                dispatchers: DashMap::new(),
                stubs: DashMap::new(),
                remote_stubs: DashMap::new(),
                proxies: DashMap::new(),
                classes: ClassRegistry::with_builtin(),
                router: OnceCell::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique identity of this process instance
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.inner.classes
    }

    pub fn downgrade(&self) -> WeakProcessHub {
        WeakProcessHub(Arc::downgrade(&self.inner))
    }

    // ---- threads --------------------------------------------------------

    /// Start a named dispatcher thread
    pub fn start_thread(&self, name: &str) -> Result<DispatcherHandle> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(Error::dispatcher_stopped(name));
        }
        let _guard = ScopedLock::new(&self.inner.lock);
        if let Some(existing) = self.inner.dispatchers.get(name) {
            if existing.is_running() {
                return Err(Error::duplicate_name("thread", name));
            }
        }
        let handle = DispatcherThread::start(name, self)?;
        self.inner
            .dispatchers
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn dispatcher(&self, name: &str) -> Option<DispatcherHandle> {
        self.inner
            .dispatchers
            .get(name)
            .map(|entry| entry.value().clone())
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.inner
            .dispatchers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stop a dispatcher thread and wait for it to exit
    pub fn stop_thread(&self, name: &str) -> Result<()> {
        let (_, handle) = self
            .inner
            .dispatchers
            .remove(name)
            .ok_or_else(|| Error::dispatcher_stopped(name))?;
        handle.stop();
        handle.join();
        Ok(())
    }

    // ---- stubs and proxies ----------------------------------------------

    /// Host a stub for `interface` under `role` on the dispatcher `thread`.
    ///
    /// The stub becomes available, and waiting proxies are connected, once
    /// the thread has registered it.
    pub fn start_stub<S>(
        &self,
        thread: &str,
        role: &str,
        interface: Arc<ServiceInterface>,
        handler: S,
    ) -> Result<StubAddress>
    where
        S: ServiceStub + 'static,
    {
        self.start_stub_boxed(thread, role, interface, Box::new(handler))
    }

    pub(crate) fn start_stub_boxed(
        &self,
        thread: &str,
        role: &str,
        interface: Arc<ServiceInterface>,
        handler: Box<dyn ServiceStub>,
    ) -> Result<StubAddress> {
        let handle = self
            .dispatcher(thread)
            .filter(DispatcherHandle::is_running)
            .ok_or_else(|| Error::dispatcher_stopped(thread))?;

        let address = StubAddress::new(interface.service_item(), role, thread);
        let key = ServiceKey::of_stub(&address);
        {
            let _guard = ScopedLock::new(&self.inner.lock);
            if self.inner.stubs.contains_key(&key) {
                return Err(Error::duplicate_name("role", role));
            }
            self.inner.stubs.insert(
                key.clone(),
                StubEntry {
                    address: address.clone(),
                    available: false,
                },
            );
        }

        let base = StubBase::new(address.clone(), interface, self.clone());
        let filters = vec![
            EventFilter::new(
                &classes::SERVICE_REQUEST_EVENT,
                AddressFilter::Stub(address.clone()),
            ),
            EventFilter::new(
                &classes::CUSTOM_EVENT,
                AddressFilter::Named(stub_consumer_name(&key)),
            ),
        ];
        if let Err(e) = handle.register_consumer(
            stub_consumer_name(&key),
            filters,
            Box::new(StubConsumer::new(base, handler)),
        ) {
            self.inner.stubs.remove(&key);
            return Err(e);
        }
        tracing::debug!("Starting {}", address);
        Ok(address)
    }

    /// Post a custom event to a local stub, handled by
    /// [`ServiceStub::process_event`] on the stub's thread
    pub fn post_stub_event(&self, stub: &StubAddress, event: CustomEvent) -> Result<()> {
        let key = ServiceKey::of_stub(stub);
        let registered = self
            .inner
            .stubs
            .get(&key)
            .is_some_and(|entry| entry.address == *stub);
        if !registered {
            return Err(Error::stub_not_found(&stub.role));
        }
        self.post_custom_event(&stub.thread, event.with_target(stub_consumer_name(&key)))
    }

    /// Stop a stub; pending calls are canceled and its proxies disconnected
    pub fn stop_stub(&self, address: &StubAddress) -> Result<()> {
        let key = ServiceKey::of_stub(address);
        let registered = self
            .inner
            .stubs
            .get(&key)
            .is_some_and(|entry| entry.address == *address);
        if !registered {
            return Err(Error::stub_not_found(&address.role));
        }
        let handle = self
            .dispatcher(&address.thread)
            .ok_or_else(|| Error::dispatcher_stopped(&address.thread))?;
        handle.unregister_consumer(stub_consumer_name(&key))
    }

    /// Address of the stub serving `key`, local stubs first
    pub fn find_stub(&self, key: &ServiceKey) -> Option<StubAddress> {
        let local = self
            .inner
            .stubs
            .get(key)
            .filter(|entry| entry.available)
            .map(|entry| entry.address.clone());
        local.or_else(|| {
            self.inner
                .remote_stubs
                .get(key)
                .map(|entry| entry.value().clone())
        })
    }

    /// Proxy of `interface` under `role` for the dispatcher `thread`.
    /// Repeated calls for the same role and thread return the same proxy.
    pub fn create_proxy(
        &self,
        thread: &str,
        role: &str,
        interface: Arc<ServiceInterface>,
    ) -> Result<Proxy> {
        let key = ServiceKey::new(interface.name(), role);
        let _guard = ScopedLock::new(&self.inner.lock);
        let proxy_key = (key.clone(), thread.to_string());
        if let Some(proxy) = self.inner.proxies.get(&proxy_key) {
            return Ok(proxy.value().clone());
        }

        let handle = self
            .dispatcher(thread)
            .filter(DispatcherHandle::is_running)
            .ok_or_else(|| Error::dispatcher_stopped(thread))?;
        let address = ProxyAddress::new(interface.service_item(), role, thread);
        let proxy = Proxy::new(address.clone(), interface, self.downgrade());
        let filters = vec![
            EventFilter::new(
                &classes::SERVICE_RESPONSE_EVENT,
                AddressFilter::Proxy(address.clone()),
            ),
            EventFilter::new(
                &classes::SERVICE_CONNECTION_EVENT,
                AddressFilter::Proxy(address.clone()),
            ),
        ];
        handle.register_consumer(
            format!("proxy:{key}"),
            filters,
            Box::new(ProxyConsumer::new(proxy.clone())),
        )?;
        self.inner.proxies.insert(proxy_key, proxy.clone());

        if let Some(stub) = self.find_stub(&key) {
            self.post_connection_event(ServiceConnectionEvent::new(
                address,
                stub,
                ConnectionStatus::Connected,
            ));
        }
        tracing::debug!("Created proxy {} on '{}'", key, thread);
        Ok(proxy)
    }

    pub fn proxy_count(&self) -> usize {
        self.inner.proxies.len()
    }

    pub(crate) fn remove_proxy(&self, proxy: &Proxy) {
        let address = proxy.address();
        let key = (ServiceKey::of_proxy(address), address.thread.clone());
        self.inner.proxies.remove(&key);
    }

    // ---- routing --------------------------------------------------------

    /// Route a function call to its stub. A call that cannot be delivered is
    /// answered with `MessageUndelivered`.
    pub fn send_request_event(&self, request: RequestEvent) {
        if request.target().is_remote() {
            if let Err(e) = self.send_remote(RemoteEvent::Request(request.clone())) {
                tracing::warn!("Cannot forward {} to {}: {}", request.msg_id(), request.target(), e);
                self.reply_to_request(&request, ResultType::MessageUndelivered);
            }
            return;
        }

        match self.local_stub_thread(request.target()) {
            Some(handle) => {
                if let Err(Event::Request(request)) = handle.try_post(request.into()) {
                    self.reply_to_request(&request, ResultType::MessageUndelivered);
                }
            }
            None => {
                tracing::debug!("No stub {} for {}", request.target(), request.msg_id());
                self.reply_to_request(&request, ResultType::MessageUndelivered);
            }
        }
    }

    /// Route a subscription change to its stub; undeliverable ones are dropped
    pub fn send_notify_request_event(&self, request: NotifyRequestEvent) {
        if request.target().is_remote() {
            if let Err(e) = self.send_remote(RemoteEvent::NotifyRequest(request)) {
                tracing::warn!("Cannot forward notification request: {}", e);
            }
            return;
        }
        let delivered = self
            .local_stub_thread(request.target())
            .is_some_and(|handle| handle.try_post(request.into()).is_ok());
        if !delivered {
            tracing::debug!("Dropping undeliverable notification request");
        }
    }

    /// Route a response, broadcast or attribute update to its proxy
    pub fn send_response_event(&self, response: ResponseEvent) {
        if response.target().is_remote() {
            if let Err(e) = self.send_remote(RemoteEvent::Response(response)) {
                tracing::warn!("Cannot forward response: {}", e);
            }
            return;
        }
        let thread = response.target().thread.clone();
        let delivered = self
            .dispatcher(&thread)
            .is_some_and(|handle| handle.try_post(response.into()).is_ok());
        if !delivered {
            tracing::debug!("Dropping response for stopped thread '{}'", thread);
        }
    }

    /// Post a custom event to a dispatcher thread
    pub fn post_custom_event(&self, thread: &str, event: CustomEvent) -> Result<()> {
        self.dispatcher(thread)
            .ok_or_else(|| Error::dispatcher_stopped(thread))?
            .post_event(event)
    }

    /// Answer a call on behalf of its target
    pub(crate) fn reply_to_request(&self, request: &RequestEvent, result: ResultType) {
        let response = ResponseEvent::new(
            request.source().clone(),
            request.target().clone(),
            request.msg_id(),
            result,
            request.seq_nr,
            EventData::new(),
        );
        self.send_response_event(response);
    }

    pub(crate) fn post_connection_event(&self, event: ServiceConnectionEvent) {
        let thread = event.target.thread.clone();
        if let Some(handle) = self.dispatcher(&thread) {
            let _ = handle.post_event(event);
        }
    }

    fn local_stub_thread(&self, target: &StubAddress) -> Option<DispatcherHandle> {
        let thread = self
            .inner
            .stubs
            .get(&ServiceKey::of_stub(target))
            .filter(|entry| entry.address == *target)
            .map(|entry| entry.address.thread.clone())?;
        self.dispatcher(&thread)
    }

    fn send_remote(&self, event: RemoteEvent) -> Result<()> {
        self.router()
            .ok_or_else(|| Error::connection_msg("not connected to a message router"))?
            .send_event(event)
    }

    // ---- availability ---------------------------------------------------

    pub(crate) fn stub_started(&self, address: &StubAddress) {
        let key = ServiceKey::of_stub(address);
        let _guard = ScopedLock::new(&self.inner.lock);
        match self.inner.stubs.get_mut(&key) {
            Some(mut entry) if entry.address == *address => entry.available = true,
            _ => return,
        }
        if let Some(remote) = self.inner.remote_stubs.get(&key).map(|entry| entry.value().clone()) {
            self.notify_proxies(&key, &remote, ConnectionStatus::Disconnected);
        }
        self.notify_proxies(&key, address, ConnectionStatus::Connected);
        if address.service.is_public() {
            if let Some(router) = self.router() {
                router.register_stub(address);
            }
        }
    }

    pub(crate) fn stub_stopped(&self, address: &StubAddress) {
        let key = ServiceKey::of_stub(address);
        let _guard = ScopedLock::new(&self.inner.lock);
        let removed = self
            .inner
            .stubs
            .remove_if(&key, |_, entry| entry.address == *address);
        if removed.is_none() {
            return;
        }
        self.notify_proxies(&key, address, ConnectionStatus::Disconnected);
        if let Some(remote) = self.inner.remote_stubs.get(&key).map(|entry| entry.value().clone()) {
            self.notify_proxies(&key, &remote, ConnectionStatus::Connected);
        }
        if address.service.is_public() {
            if let Some(router) = self.router() {
                router.unregister_stub(address);
            }
        }
    }

    pub(crate) fn remote_stub_available(&self, address: StubAddress) {
        let key = ServiceKey::of_stub(&address);
        let _guard = ScopedLock::new(&self.inner.lock);
        tracing::info!("🌐 Remote {} available", address);
        self.inner.remote_stubs.insert(key.clone(), address.clone());
        if !self.has_local_stub(&key) {
            self.notify_proxies(&key, &address, ConnectionStatus::Connected);
        }
    }

    pub(crate) fn remote_stub_unavailable(&self, address: &StubAddress) {
        let key = ServiceKey::of_stub(address);
        let _guard = ScopedLock::new(&self.inner.lock);
        let removed = self
            .inner
            .remote_stubs
            .remove_if(&key, |_, known| known == address);
        if removed.is_some() {
            tracing::info!("Remote {} unavailable", address);
            if !self.has_local_stub(&key) {
                self.notify_proxies(&key, address, ConnectionStatus::Disconnected);
            }
        }
    }

    /// Forget every remote stub reached through the lost channel and tell
    /// the dispatchers, so stubs drop listeners that can no longer be reached
    pub(crate) fn channel_lost(&self, loss: ChannelLoss) {
        let lost: Vec<StubAddress> = self
            .inner
            .remote_stubs
            .iter()
            .filter(|entry| loss.affects(&entry.value().channel))
            .map(|entry| entry.value().clone())
            .collect();
        for address in &lost {
            self.remote_stub_unavailable(address);
        }
        let handles: Vec<DispatcherHandle> = self
            .inner
            .dispatchers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in handles {
            let _ = handle.notify_channel_lost(loss);
        }
    }

    fn has_local_stub(&self, key: &ServiceKey) -> bool {
        self.inner
            .stubs
            .get(key)
            .is_some_and(|entry| entry.available)
    }

    fn notify_proxies(&self, key: &ServiceKey, stub: &StubAddress, status: ConnectionStatus) {
        let targets: Vec<ProxyAddress> = self
            .inner
            .proxies
            .iter()
            .filter(|entry| entry.key().0 == *key)
            .map(|entry| entry.value().address().clone())
            .collect();
        for target in targets {
            self.post_connection_event(ServiceConnectionEvent::new(target, stub.clone(), status));
        }
    }

    // ---- router ---------------------------------------------------------

    /// Connect to a message router. The connection is kept up in the
    /// background and public stubs are announced through it.
    pub fn connect_router(&self, config: RemoteConfig) -> Result<()> {
        config.validate()?;
        let client = RouterClient::start(config, self.downgrade())?;
        if let Err(client) = self.inner.router.set(client) {
            client.stop();
            return Err(Error::duplicate_name("router connection", self.name()));
        }
        let public: Vec<StubAddress> = self
            .inner
            .stubs
            .iter()
            .filter(|entry| entry.available && entry.address.service.is_public())
            .map(|entry| entry.address.clone())
            .collect();
        if let Some(router) = self.router() {
            for address in &public {
                router.register_stub(address);
            }
        }
        Ok(())
    }

    pub fn router(&self) -> Option<&RouterClient> {
        self.inner.router.get()
    }

    pub fn is_router_connected(&self) -> bool {
        self.router().is_some_and(RouterClient::is_connected)
    }

    // ---- shutdown -------------------------------------------------------

    /// Stop every dispatcher thread, canceling outstanding work, then close
    /// the router connection
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("🛑 Shutting down ProcessHub: {}", self.inner.name);

        let handles: Vec<DispatcherHandle> = self
            .inner
            .dispatchers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in &handles {
            handle.join();
        }
        self.inner.dispatchers.clear();

        if let Some(router) = self.router() {
            router.stop();
        }
        tracing::info!("🛑 ProcessHub shutdown complete: {}", self.inner.name);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

pub(crate) fn stub_consumer_name(key: &ServiceKey) -> String {
    format!("stub:{key}")
}
