//! Message identifiers, request kinds and result codes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sync::InterlockedValue;

/// Sequence number carried by notifications and attribute updates
pub const SEQUENCE_NUMBER_NOTIFY: u32 = 0;

/// Identifier of a request, response, broadcast or attribute within a
/// service interface. The kind is encoded in the value range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    /// Responses and broadcasts share one range
    Response,
    Attribute,
    Invalid,
}

impl MessageId {
    pub const INVALID: MessageId = MessageId(0);

    pub const REQUEST_FIRST: u32 = 0x0001;
    pub const REQUEST_LAST: u32 = 0x3FFF;
    pub const RESPONSE_FIRST: u32 = 0x4000;
    pub const RESPONSE_LAST: u32 = 0x7FFF;
    pub const ATTRIBUTE_FIRST: u32 = 0x8000;
    pub const ATTRIBUTE_LAST: u32 = 0xBFFF;

    pub const fn request(offset: u32) -> Self {
        Self(Self::REQUEST_FIRST + offset)
    }

    pub const fn response(offset: u32) -> Self {
        Self(Self::RESPONSE_FIRST + offset)
    }

    pub const fn attribute(offset: u32) -> Self {
        Self(Self::ATTRIBUTE_FIRST + offset)
    }

    pub fn kind(&self) -> MessageKind {
        match self.0 {
            Self::REQUEST_FIRST..=Self::REQUEST_LAST => MessageKind::Request,
            Self::RESPONSE_FIRST..=Self::RESPONSE_LAST => MessageKind::Response,
            Self::ATTRIBUTE_FIRST..=Self::ATTRIBUTE_LAST => MessageKind::Attribute,
            _ => MessageKind::Invalid,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == MessageKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind() == MessageKind::Response
    }

    pub fn is_attribute(&self) -> bool {
        self.kind() == MessageKind::Attribute
    }

    pub fn is_valid(&self) -> bool {
        self.kind() != MessageKind::Invalid
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Kind of a service request event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    CallFunction,
    StartNotify,
    StopNotify,
    RemoveAllNotify,
}

impl RequestType {
    pub fn is_notify(&self) -> bool {
        !matches!(self, RequestType::CallFunction)
    }
}

/// Outcome carried by every response event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultType {
    /// Response to a function call
    RequestOK,
    /// Attribute update or broadcast with valid data
    DataOK,
    RequestError,
    /// The stub still serves an earlier request with the same response
    RequestBusy,
    RequestCanceled,
    /// No stub matched the target address
    MessageUndelivered,
    /// Attribute has no valid value
    DataInvalid,
    /// Message is not part of the service or is not allowed here
    RequestInvalid,
    ServiceUnavailable,
}

impl ResultType {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultType::RequestOK | ResultType::DataOK)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Validity of a cached attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataState {
    Valid,
    #[default]
    Invalid,
}

/// Allocator of request sequence numbers. Never hands out
/// [`SEQUENCE_NUMBER_NOTIFY`].
#[derive(Debug, Default)]
pub struct SequenceCounter(InterlockedValue);

impl SequenceCounter {
    pub const fn new() -> Self {
        Self(InterlockedValue::new(0))
    }

    pub fn next(&self) -> u32 {
        loop {
            let seq = self.0.increment() as u32;
            if seq != SEQUENCE_NUMBER_NOTIFY {
                return seq;
            }
        }
    }
}

/// Service interface version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a provider with this version can serve a consumer built
    /// against `required`
    pub fn is_compatible(&self, required: &Version) -> bool {
        self.major == required.major && self.minor >= required.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
