//! Event consumers and the filters that select their events

use crate::address::{Channel, ProxyAddress, StubAddress};
use crate::event::Event;
use crate::rtti::RuntimeClass;
use crate::ProcessHub;

use super::DispatcherHandle;

/// Receiver of events on a dispatcher thread.
///
/// All callbacks of a consumer run on the thread it is registered with,
/// one at a time.
pub trait EventConsumer: Send {
    fn process_event(&mut self, event: &Event, ctx: &mut DispatchContext);

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Generic
    }

    /// Called once the registration has been processed by the thread
    fn on_registered(&mut self, _ctx: &mut DispatchContext) {}

    /// Called when the consumer is unregistered or its thread stops
    fn on_shutdown(&mut self, _ctx: &mut DispatchContext) {}

    /// Called when a remote peer or the router connection is lost
    fn on_channel_lost(&mut self, _loss: ChannelLoss, _ctx: &mut DispatchContext) {}
}

impl<F> EventConsumer for F
where
    F: FnMut(&Event, &mut DispatchContext) + Send,
{
    fn process_event(&mut self, event: &Event, ctx: &mut DispatchContext) {
        self(event, ctx)
    }
}

/// Shutdown order of consumers: stubs first, proxies last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsumerKind {
    Stub,
    Generic,
    Proxy,
}

/// Remote connectivity that went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLoss {
    /// A single remote process
    Peer(u64),
    /// The router connection, and with it every remote process
    Router,
}

impl ChannelLoss {
    pub fn affects(&self, channel: &Channel) -> bool {
        match self {
            ChannelLoss::Peer(cookie) => channel.is_remote() && channel.cookie == *cookie,
            ChannelLoss::Router => channel.is_remote(),
        }
    }
}

/// Address part of an [`EventFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressFilter {
    Any,
    /// Requests targeting exactly this stub
    Stub(StubAddress),
    /// Responses and availability changes targeting exactly this proxy
    Proxy(ProxyAddress),
    /// Custom events sent to this consumer name
    Named(String),
}

/// Selects events by runtime class and target address
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub class: &'static RuntimeClass,
    pub address: AddressFilter,
}

impl EventFilter {
    pub fn new(class: &'static RuntimeClass, address: AddressFilter) -> Self {
        Self { class, address }
    }

    /// Every event of `class` or a derived class
    pub fn any(class: &'static RuntimeClass) -> Self {
        Self::new(class, AddressFilter::Any)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !event.is_instance_of(self.class) {
            return false;
        }
        if let Event::Custom(custom) = event {
            if let Some(target) = custom.target() {
                return matches!(&self.address, AddressFilter::Named(name) if name == target);
            }
        }
        match (&self.address, event) {
            (AddressFilter::Any, _) => true,
            (AddressFilter::Stub(stub), Event::Request(request)) => request.target() == stub,
            (AddressFilter::Stub(stub), Event::NotifyRequest(request)) => request.target() == stub,
            (AddressFilter::Proxy(proxy), Event::Response(response)) => response.target() == proxy,
            (AddressFilter::Proxy(proxy), Event::Connection(connection)) => {
                &connection.target == proxy
            }
            (AddressFilter::Named(_), Event::Custom(_)) => true,
            _ => false,
        }
    }
}

/// What a consumer may use while handling an event
pub struct DispatchContext {
    hub: ProcessHub,
    handle: DispatcherHandle,
}

impl DispatchContext {
    pub(crate) fn new(hub: ProcessHub, handle: DispatcherHandle) -> Self {
        Self { hub, handle }
    }

    pub fn hub(&self) -> &ProcessHub {
        &self.hub
    }

    /// Handle of the thread running the consumer
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.handle
    }

    pub fn thread_name(&self) -> &str {
        self.handle.name()
    }
}
