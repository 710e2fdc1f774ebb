//! Class descriptors of the built-in events

use crate::rtti::RuntimeClass;
use crate::runtime_class;

runtime_class!(pub EVENT = "Event");

runtime_class!(pub SERVICE_REQUEST_EVENT = "ServiceRequestEvent" : EVENT);
runtime_class!(pub REQUEST_EVENT = "RequestEvent" : SERVICE_REQUEST_EVENT);
runtime_class!(pub LOCAL_REQUEST_EVENT = "LocalRequestEvent" : REQUEST_EVENT);
runtime_class!(pub REMOTE_REQUEST_EVENT = "RemoteRequestEvent" : REQUEST_EVENT);
runtime_class!(pub NOTIFY_REQUEST_EVENT = "NotifyRequestEvent" : SERVICE_REQUEST_EVENT);
runtime_class!(pub LOCAL_NOTIFY_REQUEST_EVENT = "LocalNotifyRequestEvent" : NOTIFY_REQUEST_EVENT);
runtime_class!(pub REMOTE_NOTIFY_REQUEST_EVENT = "RemoteNotifyRequestEvent" : NOTIFY_REQUEST_EVENT);

runtime_class!(pub SERVICE_RESPONSE_EVENT = "ServiceResponseEvent" : EVENT);
runtime_class!(pub RESPONSE_EVENT = "ResponseEvent" : SERVICE_RESPONSE_EVENT);
runtime_class!(pub LOCAL_RESPONSE_EVENT = "LocalResponseEvent" : RESPONSE_EVENT);
runtime_class!(pub REMOTE_RESPONSE_EVENT = "RemoteResponseEvent" : RESPONSE_EVENT);

runtime_class!(pub SERVICE_CONNECTION_EVENT = "ServiceConnectionEvent" : EVENT);
runtime_class!(pub CUSTOM_EVENT = "CustomEvent" : EVENT);

pub(crate) static ALL: [&RuntimeClass; 14] = [
    &EVENT,
    &SERVICE_REQUEST_EVENT,
    &REQUEST_EVENT,
    &LOCAL_REQUEST_EVENT,
    &REMOTE_REQUEST_EVENT,
    &NOTIFY_REQUEST_EVENT,
    &LOCAL_NOTIFY_REQUEST_EVENT,
    &REMOTE_NOTIFY_REQUEST_EVENT,
    &SERVICE_RESPONSE_EVENT,
    &RESPONSE_EVENT,
    &LOCAL_RESPONSE_EVENT,
    &REMOTE_RESPONSE_EVENT,
    &SERVICE_CONNECTION_EVENT,
    &CUSTOM_EVENT,
];
