//! Event model
//!
//! Everything a dispatcher delivers is an [`Event`]. Service requests and
//! responses can also cross process boundaries as a [`RemoteEvent`], the
//! serializable subset written to router frames.

pub mod classes;
mod connection;
mod custom;
mod data;
mod request;
mod response;

pub use connection::{ConnectionStatus, ServiceConnectionEvent};
pub use custom::CustomEvent;
pub use data::{EventData, EventDataStream};
pub use request::{NotifyRequestEvent, RequestEvent, ServiceRequestEvent};
pub use response::{ResponseEvent, ServiceResponseEvent};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::address::Channel;
use crate::rtti::RuntimeClass;
use crate::Result;

bitflags! {
    /// Classification flags of an event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventType: u32 {
        /// Source and target live in this process
        const LOCAL = 1 << 0;
        /// Source or target lives in another process
        const REMOTE = 1 << 1;
        const SERVICE_REQUEST = 1 << 2;
        const SERVICE_RESPONSE = 1 << 3;
        /// Subscription requests, broadcasts, attribute updates and
        /// availability changes
        const NOTIFICATION = 1 << 4;
        /// Can be serialized and sent to another process
        const EXTERNAL = 1 << 5;
        const CUSTOM = 1 << 6;
    }
}

/// Unit of work queued on a dispatcher thread
#[derive(Debug)]
pub enum Event {
    Request(RequestEvent),
    NotifyRequest(NotifyRequestEvent),
    Response(ResponseEvent),
    Connection(ServiceConnectionEvent),
    Custom(CustomEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        let locality = if self.is_remote() {
            EventType::REMOTE
        } else {
            EventType::LOCAL
        };
        match self {
            Event::Request(_) => locality | EventType::SERVICE_REQUEST | EventType::EXTERNAL,
            Event::NotifyRequest(_) => {
                locality
                    | EventType::SERVICE_REQUEST
                    | EventType::NOTIFICATION
                    | EventType::EXTERNAL
            }
            Event::Response(response) => {
                let mut flags = locality | EventType::SERVICE_RESPONSE | EventType::EXTERNAL;
                if response.is_notification() {
                    flags |= EventType::NOTIFICATION;
                }
                flags
            }
            Event::Connection(_) => locality | EventType::NOTIFICATION,
            Event::Custom(_) => EventType::LOCAL | EventType::CUSTOM,
        }
    }

    pub fn is_remote(&self) -> bool {
        match self {
            Event::Request(request) => request.header.is_remote(),
            Event::NotifyRequest(request) => request.header.is_remote(),
            Event::Response(response) => response.header.is_remote(),
            Event::Connection(connection) => connection.stub.is_remote(),
            Event::Custom(_) => false,
        }
    }

    /// Concrete class of the event; local and remote variants differ
    pub fn runtime_class(&self) -> &'static RuntimeClass {
        let remote = self.is_remote();
        match self {
            Event::Request(_) if remote => &classes::REMOTE_REQUEST_EVENT,
            Event::Request(_) => &classes::LOCAL_REQUEST_EVENT,
            Event::NotifyRequest(_) if remote => &classes::REMOTE_NOTIFY_REQUEST_EVENT,
            Event::NotifyRequest(_) => &classes::LOCAL_NOTIFY_REQUEST_EVENT,
            Event::Response(_) if remote => &classes::REMOTE_RESPONSE_EVENT,
            Event::Response(_) => &classes::LOCAL_RESPONSE_EVENT,
            Event::Connection(_) => &classes::SERVICE_CONNECTION_EVENT,
            Event::Custom(custom) => custom.class(),
        }
    }

    pub fn is_instance_of(&self, class: &RuntimeClass) -> bool {
        self.runtime_class().is_instance_of(class)
    }
}

impl From<RequestEvent> for Event {
    fn from(event: RequestEvent) -> Self {
        Event::Request(event)
    }
}

impl From<NotifyRequestEvent> for Event {
    fn from(event: NotifyRequestEvent) -> Self {
        Event::NotifyRequest(event)
    }
}

impl From<ResponseEvent> for Event {
    fn from(event: ResponseEvent) -> Self {
        Event::Response(event)
    }
}

impl From<ServiceConnectionEvent> for Event {
    fn from(event: ServiceConnectionEvent) -> Self {
        Event::Connection(event)
    }
}

impl From<CustomEvent> for Event {
    fn from(event: CustomEvent) -> Self {
        Event::Custom(event)
    }
}

/// Event that can travel between processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteEvent {
    Request(RequestEvent),
    NotifyRequest(NotifyRequestEvent),
    Response(ResponseEvent),
}

impl RemoteEvent {
    /// Extract the serializable part of a local event
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Request(request) => Some(RemoteEvent::Request(request.clone())),
            Event::NotifyRequest(request) => Some(RemoteEvent::NotifyRequest(request.clone())),
            Event::Response(response) => Some(RemoteEvent::Response(response.clone())),
            Event::Connection(_) | Event::Custom(_) => None,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            RemoteEvent::Request(request) => Event::Request(request),
            RemoteEvent::NotifyRequest(request) => Event::NotifyRequest(request),
            RemoteEvent::Response(response) => Event::Response(response),
        }
    }

    /// Append the encoded event to `stream`
    pub fn write_to_stream(&self, stream: &mut EventData) -> Result<()> {
        stream.write_value(self)
    }

    /// Decode the next event from `stream`
    pub fn read_from_stream(stream: &mut EventDataStream<'_>) -> Result<Self> {
        stream.read_value()
    }

    /// Channel of the sending side
    pub fn source_channel(&self) -> Channel {
        match self {
            RemoteEvent::Request(request) => request.header.source.channel,
            RemoteEvent::NotifyRequest(request) => request.header.source.channel,
            RemoteEvent::Response(response) => response.header.source.channel,
        }
    }

    /// Channel of the receiving side
    pub fn target_channel(&self) -> Channel {
        match self {
            RemoteEvent::Request(request) => request.header.target.channel,
            RemoteEvent::NotifyRequest(request) => request.header.target.channel,
            RemoteEvent::Response(response) => response.header.target.channel,
        }
    }

    pub fn set_source_channel(&mut self, channel: Channel) {
        match self {
            RemoteEvent::Request(request) => request.header.source.channel = channel,
            RemoteEvent::NotifyRequest(request) => request.header.source.channel = channel,
            RemoteEvent::Response(response) => response.header.source.channel = channel,
        }
    }

    pub fn set_target_channel(&mut self, channel: Channel) {
        match self {
            RemoteEvent::Request(request) => request.header.target.channel = channel,
            RemoteEvent::NotifyRequest(request) => request.header.target.channel = channel,
            RemoteEvent::Response(response) => response.header.target.channel = channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ProxyAddress, ServiceItem, ServiceKind, StubAddress};
    use crate::message::{MessageId, RequestType, ResultType, Version, SEQUENCE_NUMBER_NOTIFY};

    fn addresses() -> (ProxyAddress, StubAddress) {
        let service = ServiceItem::new("Calculator", Version::new(1, 0, 0), ServiceKind::Public);
        (
            ProxyAddress::new(service.clone(), "calc", "client"),
            StubAddress::new(service, "calc", "worker"),
        )
    }

    #[test]
    fn test_notify_request_rejects_calls_and_request_ids() {
        let (proxy, stub) = addresses();
        assert!(NotifyRequestEvent::new(
            proxy.clone(),
            stub.clone(),
            MessageId::attribute(0),
            RequestType::CallFunction
        )
        .is_err());
        assert!(NotifyRequestEvent::new(
            proxy.clone(),
            stub.clone(),
            MessageId::request(0),
            RequestType::StartNotify
        )
        .is_err());
        assert!(NotifyRequestEvent::new(proxy, stub, MessageId::response(0), RequestType::StartNotify).is_ok());
    }

    #[test]
    fn test_class_and_flags_follow_locality() {
        let (proxy, stub) = addresses();
        let local: Event =
            RequestEvent::new(proxy.clone(), stub.clone(), MessageId::request(0), 1, EventData::new()).into();
        assert!(local.is_instance_of(&classes::LOCAL_REQUEST_EVENT));
        assert!(local.is_instance_of(&classes::SERVICE_REQUEST_EVENT));
        assert!(local.event_type().contains(EventType::LOCAL | EventType::SERVICE_REQUEST));

        let remote_proxy = proxy.with_channel(Channel::remote(300, 256, 300));
        let remote: Event = ResponseEvent::new(
            remote_proxy,
            stub,
            MessageId::response(0),
            ResultType::DataOK,
            SEQUENCE_NUMBER_NOTIFY,
            EventData::new(),
        )
        .into();
        assert!(remote.is_instance_of(&classes::REMOTE_RESPONSE_EVENT));
        assert!(!remote.is_instance_of(&classes::LOCAL_RESPONSE_EVENT));
        assert!(remote
            .event_type()
            .contains(EventType::REMOTE | EventType::NOTIFICATION | EventType::EXTERNAL));
    }

    #[test]
    fn test_remote_event_stream_preserves_fields() {
        let (proxy, stub) = addresses();
        let mut data = EventData::new();
        data.write_value(&(2i32, 3i32)).unwrap();
        let mut event = RemoteEvent::Request(RequestEvent::new(proxy, stub, MessageId::request(0), 7, data));
        event.set_source_channel(Channel::remote(300, 256, 300));
        event.set_target_channel(Channel::remote(300, 256, 256));

        let mut stream = EventData::new();
        event.write_to_stream(&mut stream).unwrap();
        let mut reader = stream.stream();
        let decoded = RemoteEvent::read_from_stream(&mut reader).unwrap();
        assert!(reader.is_at_end());
        assert_eq!(decoded, event);
        assert_eq!(decoded.source_channel().cookie, 300);
        assert_eq!(decoded.target_channel().cookie, 256);

        let Event::Request(request) = decoded.into_event() else {
            panic!("expected request");
        };
        assert_eq!(request.data.value::<(i32, i32)>().unwrap(), (2, 3));
    }

    #[test]
    fn test_custom_event_payload() {
        crate::runtime_class!(TICK = "Tick" : classes::CUSTOM_EVENT);
        let event: Event = CustomEvent::new(&TICK, 42u32).with_target("clock").into();
        assert!(event.is_instance_of(&classes::CUSTOM_EVENT));
        assert_eq!(event.event_type(), EventType::LOCAL | EventType::CUSTOM);
        let Event::Custom(custom) = &event else {
            panic!("expected custom event");
        };
        assert_eq!(custom.payload::<u32>(), Some(&42));
        assert_eq!(custom.target(), Some("clock"));
        assert!(RemoteEvent::from_event(&event).is_none());
    }
}
