//! Stub (service provider) runtime

use std::collections::HashMap;
use std::sync::Arc;

use crate::address::{ProxyAddress, StubAddress};
use crate::dispatcher::{ChannelLoss, ConsumerKind, DispatchContext, EventConsumer};
use crate::event::{CustomEvent, Event, EventData, NotifyRequestEvent, RequestEvent, ResponseEvent};
use crate::hub::{stub_consumer_name, ServiceKey};
use crate::interface::ServiceInterface;
use crate::message::{DataState, MessageId, RequestType, ResultType, SEQUENCE_NUMBER_NOTIFY};
use crate::{ProcessHub, Result};

/// Service implementation hosted by a stub.
///
/// Every callback runs on the dispatcher thread that hosts the stub.
pub trait ServiceStub: Send {
    /// Handle a function call. Answer with [`StubBase::send_response`];
    /// returning an error answers the caller with `RequestError`.
    fn process_request(&mut self, stub: &mut StubBase, request: &RequestEvent) -> Result<()>;

    /// Handle a custom event posted with [`ProcessHub::post_stub_event`].
    /// This is where a stub changes attributes, broadcasts or answers a
    /// deferred call on its own initiative.
    fn process_event(&mut self, _stub: &mut StubBase, _event: &CustomEvent) {}

    /// Called once the stub is registered and announced
    fn startup(&mut self, _stub: &mut StubBase) {}

    /// Called before pending requests are canceled
    fn shutdown(&mut self, _stub: &mut StubBase) {}
}

/// A proxy waiting for a message of the stub.
///
/// Waiters of a function call carry the request's sequence number;
/// subscribers carry [`SEQUENCE_NUMBER_NOTIFY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub msg_id: MessageId,
    pub seq_nr: u32,
    pub proxy: ProxyAddress,
}

impl Listener {
    pub fn is_subscriber(&self) -> bool {
        self.seq_nr == SEQUENCE_NUMBER_NOTIFY
    }
}

/// State and protocol shared by every stub: listeners, cached attributes and
/// response fan-out
pub struct StubBase {
    address: StubAddress,
    interface: Arc<ServiceInterface>,
    hub: ProcessHub,
    listeners: Vec<Listener>,
    attributes: HashMap<MessageId, (DataState, EventData)>,
    shutting_down: bool,
}

impl StubBase {
    pub(crate) fn new(address: StubAddress, interface: Arc<ServiceInterface>, hub: ProcessHub) -> Self {
        Self {
            address,
            interface,
            hub,
            listeners: Vec::new(),
            attributes: HashMap::new(),
            shutting_down: false,
        }
    }

    pub fn address(&self) -> &StubAddress {
        &self.address
    }

    pub fn interface(&self) -> &ServiceInterface {
        &self.interface
    }

    pub fn hub(&self) -> &ProcessHub {
        &self.hub
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Queue a custom event for this stub's own
    /// [`ServiceStub::process_event`], e.g. to finish work later
    pub fn post_event(&self, event: CustomEvent) -> Result<()> {
        self.hub.post_stub_event(&self.address, event)
    }

    /// Whether a call waiting for `response` is still unanswered
    pub fn has_pending(&self, response: MessageId) -> bool {
        self.listeners
            .iter()
            .any(|listener| listener.msg_id == response && !listener.is_subscriber())
    }

    /// Answer every proxy waiting for `response` and every subscriber of it
    pub fn send_response(&mut self, response: MessageId, data: EventData) {
        if !self.interface.is_response(response) {
            tracing::error!(
                "{} is not a response of '{}'",
                response,
                self.interface.name()
            );
            return;
        }
        self.fan_out(response, ResultType::RequestOK, ResultType::DataOK, data, true);
    }

    /// Send a broadcast to its subscribers
    pub fn send_broadcast(&mut self, broadcast: MessageId, data: EventData) {
        if !self.interface.is_response(broadcast) {
            tracing::error!(
                "{} is not a broadcast of '{}'",
                broadcast,
                self.interface.name()
            );
            return;
        }
        self.fan_out(broadcast, ResultType::DataOK, ResultType::DataOK, data, false);
    }

    /// Cache a new attribute value and notify its subscribers
    pub fn set_attribute(&mut self, attribute: MessageId, data: EventData) {
        if !self.interface.is_attribute(attribute) {
            tracing::error!(
                "{} is not an attribute of '{}'",
                attribute,
                self.interface.name()
            );
            return;
        }
        self.attributes
            .insert(attribute, (DataState::Valid, data.clone()));
        self.fan_out(attribute, ResultType::DataOK, ResultType::DataOK, data, false);
    }

    /// Mark an attribute invalid and notify its subscribers
    pub fn invalidate_attribute(&mut self, attribute: MessageId) {
        if !self.interface.is_attribute(attribute) {
            return;
        }
        self.attributes
            .insert(attribute, (DataState::Invalid, EventData::new()));
        self.fan_out(
            attribute,
            ResultType::DataInvalid,
            ResultType::DataInvalid,
            EventData::new(),
            false,
        );
    }

    /// Cached attribute value, `None` while invalid
    pub fn attribute(&self, attribute: MessageId) -> Option<&EventData> {
        match self.attributes.get(&attribute) {
            Some((DataState::Valid, data)) => Some(data),
            _ => None,
        }
    }

    /// Fail the listeners of a message.
    ///
    /// A request fails the waiters of its response with `RequestError`
    /// (`RequestCanceled` when `canceled`), a response or broadcast fails its
    /// listeners with `RequestInvalid` (`RequestCanceled`), an attribute is
    /// invalidated and anything still listening on an unknown id gets
    /// `RequestInvalid`.
    pub fn error_request(&mut self, msg_id: MessageId, canceled: bool) {
        tracing::error!(
            "Failing {} of {} ({})",
            msg_id,
            self.address,
            if canceled { "canceled" } else { "error" }
        );
        if self.interface.is_request(msg_id) {
            let Some(response) = self.interface.response_of(msg_id) else {
                return;
            };
            let result = if canceled {
                ResultType::RequestCanceled
            } else {
                ResultType::RequestError
            };
            self.fail_waiters(response, result);
        } else if self.interface.is_response(msg_id) {
            let result = if canceled {
                ResultType::RequestCanceled
            } else {
                ResultType::RequestInvalid
            };
            self.fan_out(msg_id, result, result, EventData::new(), true);
        } else if self.interface.is_attribute(msg_id) {
            self.invalidate_attribute(msg_id);
        } else {
            tracing::error!(
                "{} is not part of service '{}'",
                msg_id,
                self.interface.name()
            );
            self.fan_out(
                msg_id,
                ResultType::RequestInvalid,
                ResultType::RequestInvalid,
                EventData::new(),
                true,
            );
        }
    }

    /// Cancel the unanswered calls of `request`
    pub fn cancel_request(&mut self, request: MessageId) {
        self.error_request(request, true);
    }

    /// Forget every listener reached through a lost channel
    pub fn remove_channel_listeners(&mut self, loss: ChannelLoss) {
        let before = self.listeners.len();
        self.listeners
            .retain(|listener| !loss.affects(&listener.proxy.channel));
        let removed = before - self.listeners.len();
        if removed > 0 {
            tracing::info!("Removed {} remote listeners of {}", removed, self.address);
        }
    }

    fn fail_waiters(&mut self, response: MessageId, result: ResultType) {
        let waiters = self.take_waiters(response);
        for waiter in waiters {
            self.send_to(waiter.proxy, response, result, waiter.seq_nr, EventData::new());
        }
    }

    fn take_waiters(&mut self, msg_id: MessageId) -> Vec<Listener> {
        let (waiters, rest): (Vec<Listener>, Vec<Listener>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|listener| listener.msg_id == msg_id && !listener.is_subscriber());
        self.listeners = rest;
        waiters
    }

    /// One event per listener of `msg_id`. Waiters are removed once answered.
    fn fan_out(
        &mut self,
        msg_id: MessageId,
        waiter_result: ResultType,
        subscriber_result: ResultType,
        data: EventData,
        include_waiters: bool,
    ) {
        let waiters = if include_waiters {
            self.take_waiters(msg_id)
        } else {
            Vec::new()
        };
        let subscribers: Vec<ProxyAddress> = self
            .listeners
            .iter()
            .filter(|listener| listener.msg_id == msg_id && listener.is_subscriber())
            .map(|listener| listener.proxy.clone())
            .collect();

        for waiter in waiters {
            self.send_to(waiter.proxy, msg_id, waiter_result, waiter.seq_nr, data.clone());
        }
        for proxy in subscribers {
            self.send_to(proxy, msg_id, subscriber_result, SEQUENCE_NUMBER_NOTIFY, data.clone());
        }
    }

    fn send_to(
        &self,
        proxy: ProxyAddress,
        msg_id: MessageId,
        result: ResultType,
        seq_nr: u32,
        data: EventData,
    ) {
        let response = ResponseEvent::new(proxy, self.address.clone(), msg_id, result, seq_nr, data);
        self.hub.send_response_event(response);
    }

    fn process_call(&mut self, handler: &mut dyn ServiceStub, request: &RequestEvent) {
        let msg_id = request.msg_id();
        let proxy = request.source().clone();

        if !self.interface.is_request(msg_id) {
            tracing::error!("{} sent unknown request {} to {}", proxy, msg_id, self.address);
            self.send_to(proxy, msg_id, ResultType::RequestInvalid, request.seq_nr, EventData::new());
            return;
        }
        let response = self.interface.response_of(msg_id);
        let reply_id = response.unwrap_or(msg_id);
        if self.shutting_down {
            self.send_to(proxy, reply_id, ResultType::RequestBusy, request.seq_nr, EventData::new());
            return;
        }
        if let Some(response) = response {
            if self.has_pending(response) {
                tracing::debug!("{} busy with {}, rejecting {}", self.address, response, msg_id);
                self.send_to(proxy, response, ResultType::RequestBusy, request.seq_nr, EventData::new());
                return;
            }
            self.listeners.push(Listener {
                msg_id: response,
                seq_nr: request.seq_nr,
                proxy,
            });
        }

        tracing::trace!("{} handles {} (seq {})", self.address, msg_id, request.seq_nr);
        if let Err(e) = handler.process_request(self, request) {
            tracing::error!("Request {} failed on {}: {}", msg_id, self.address, e);
            self.error_request(msg_id, false);
        }
    }

    fn process_notify(&mut self, request: &NotifyRequestEvent) {
        let msg_id = request.msg_id();
        let proxy = request.source().clone();
        match request.request_type() {
            RequestType::StartNotify => {
                let known = self.interface.is_response(msg_id) || self.interface.is_attribute(msg_id);
                if !known {
                    tracing::error!("{} cannot subscribe to {} of {}", proxy, msg_id, self.address);
                    let result = if msg_id.is_attribute() {
                        ResultType::DataInvalid
                    } else {
                        ResultType::RequestInvalid
                    };
                    self.send_to(proxy, msg_id, result, SEQUENCE_NUMBER_NOTIFY, EventData::new());
                    return;
                }
                let subscriber = Listener {
                    msg_id,
                    seq_nr: SEQUENCE_NUMBER_NOTIFY,
                    proxy: proxy.clone(),
                };
                if !self.listeners.contains(&subscriber) {
                    self.listeners.push(subscriber);
                }
                if self.interface.is_attribute(msg_id) {
                    let (result, data) = match self.attribute(msg_id) {
                        Some(data) => (ResultType::DataOK, data.clone()),
                        None => (ResultType::DataInvalid, EventData::new()),
                    };
                    self.send_to(proxy, msg_id, result, SEQUENCE_NUMBER_NOTIFY, data);
                }
            }
            RequestType::StopNotify => {
                self.listeners.retain(|listener| {
                    !(listener.is_subscriber() && listener.msg_id == msg_id && listener.proxy == proxy)
                });
            }
            RequestType::RemoveAllNotify => {
                self.listeners
                    .retain(|listener| !(listener.is_subscriber() && listener.proxy == proxy));
            }
            RequestType::CallFunction => {}
        }
    }

    fn cancel_all(&mut self) {
        let waiters: Vec<Listener> = std::mem::take(&mut self.listeners)
            .into_iter()
            .filter(|listener| !listener.is_subscriber())
            .collect();
        for waiter in waiters {
            self.send_to(
                waiter.proxy,
                waiter.msg_id,
                ResultType::RequestCanceled,
                waiter.seq_nr,
                EventData::new(),
            );
        }
    }
}

/// Hosts a stub on its dispatcher thread
pub(crate) struct StubConsumer {
    name: String,
    base: StubBase,
    handler: Box<dyn ServiceStub>,
}

impl StubConsumer {
    pub(crate) fn new(base: StubBase, handler: Box<dyn ServiceStub>) -> Self {
        Self {
            name: stub_consumer_name(&ServiceKey::of_stub(&base.address)),
            base,
            handler,
        }
    }
}

impl EventConsumer for StubConsumer {
    fn process_event(&mut self, event: &Event, _ctx: &mut DispatchContext) {
        match event {
            Event::Request(request) => self.base.process_call(self.handler.as_mut(), request),
            Event::NotifyRequest(request) => self.base.process_notify(request),
            Event::Custom(custom) if custom.target() == Some(self.name.as_str()) => {
                self.handler.process_event(&mut self.base, custom)
            }
            _ => {}
        }
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Stub
    }

    fn on_registered(&mut self, _ctx: &mut DispatchContext) {
        tracing::info!("✅ Stub {} started", self.base.address);
        self.base.hub.stub_started(&self.base.address);
        self.handler.startup(&mut self.base);
    }

    fn on_shutdown(&mut self, _ctx: &mut DispatchContext) {
        self.base.shutting_down = true;
        self.handler.shutdown(&mut self.base);
        self.base.cancel_all();
        self.base.hub.stub_stopped(&self.base.address);
        tracing::info!("Stub {} stopped", self.base.address);
    }

    fn on_channel_lost(&mut self, loss: ChannelLoss, _ctx: &mut DispatchContext) {
        self.base.remove_channel_listeners(loss);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::dispatcher::{AddressFilter, EventFilter};
    use crate::event::classes;
    use crate::message::Version;

    #[test]
    fn test_error_request_answers_listeners_of_unknown_id() {
        let hub = ProcessHub::new("error-request-test");
        let client = hub.start_thread("client").unwrap();
        let interface = Arc::new(
            ServiceInterface::builder("Calculator", Version::new(1, 0, 0))
                .build()
                .unwrap(),
        );
        let proxy = ProxyAddress::new(interface.service_item(), "calc", "client");
        let (tx, rx) = mpsc::channel();
        client
            .register_consumer(
                "listener",
                vec![EventFilter::new(
                    &classes::RESPONSE_EVENT,
                    AddressFilter::Proxy(proxy.clone()),
                )],
                Box::new(move |event: &Event, _ctx: &mut DispatchContext| {
                    if let Event::Response(response) = event {
                        let _ = tx.send((response.msg_id(), response.result(), response.seq_nr()));
                    }
                }),
            )
            .unwrap();

        let address = StubAddress::new(interface.service_item(), "calc", "worker");
        let mut stub = StubBase::new(address, interface, hub.clone());
        let unknown = MessageId::response(7);
        stub.listeners.push(Listener {
            msg_id: unknown,
            seq_nr: 4,
            proxy,
        });
        stub.error_request(unknown, false);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (unknown, ResultType::RequestInvalid, 4)
        );
        assert!(stub.listeners().is_empty());
        hub.shutdown();
    }
}
