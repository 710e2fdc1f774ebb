//! Service request events

use serde::{Deserialize, Serialize};

use super::EventData;
use crate::address::{ProxyAddress, StubAddress};
use crate::message::{MessageId, RequestType};
use crate::{Error, Result};

/// Header shared by every request a proxy sends to a stub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequestEvent {
    /// Requesting proxy
    pub source: ProxyAddress,
    /// Target stub
    pub target: StubAddress,
    pub msg_id: MessageId,
    pub request_type: RequestType,
}

impl ServiceRequestEvent {
    pub fn is_remote(&self) -> bool {
        self.source.is_remote() || self.target.is_remote()
    }
}

/// Function call carrying arguments and the caller's sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub header: ServiceRequestEvent,
    pub seq_nr: u32,
    pub data: EventData,
}

impl RequestEvent {
    pub fn new(
        source: ProxyAddress,
        target: StubAddress,
        msg_id: MessageId,
        seq_nr: u32,
        data: EventData,
    ) -> Self {
        Self {
            header: ServiceRequestEvent {
                source,
                target,
                msg_id,
                request_type: RequestType::CallFunction,
            },
            seq_nr,
            data,
        }
    }

    pub fn source(&self) -> &ProxyAddress {
        &self.header.source
    }

    pub fn target(&self) -> &StubAddress {
        &self.header.target
    }

    pub fn msg_id(&self) -> MessageId {
        self.header.msg_id
    }
}

/// Subscription change. Carries no payload; request ids cannot be
/// subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequestEvent {
    pub header: ServiceRequestEvent,
}

impl NotifyRequestEvent {
    pub fn new(
        source: ProxyAddress,
        target: StubAddress,
        msg_id: MessageId,
        request_type: RequestType,
    ) -> Result<Self> {
        if request_type == RequestType::CallFunction {
            return Err(Error::invalid_request(
                "notify request cannot call a function",
                Some(msg_id.to_string()),
            ));
        }
        if msg_id.is_request() {
            return Err(Error::invalid_request(
                format!("request {msg_id} cannot be subscribed"),
                Some(target.role.clone()),
            ));
        }
        Ok(Self {
            header: ServiceRequestEvent {
                source,
                target,
                msg_id,
                request_type,
            },
        })
    }

    pub fn source(&self) -> &ProxyAddress {
        &self.header.source
    }

    pub fn target(&self) -> &StubAddress {
        &self.header.target
    }

    pub fn msg_id(&self) -> MessageId {
        self.header.msg_id
    }

    pub fn request_type(&self) -> RequestType {
        self.header.request_type
    }
}
