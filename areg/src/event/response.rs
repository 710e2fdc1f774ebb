//! Service response events

use serde::{Deserialize, Serialize};

use super::EventData;
use crate::address::{ProxyAddress, StubAddress};
use crate::message::{MessageId, ResultType, SEQUENCE_NUMBER_NOTIFY};

/// Header of every event a stub sends back to a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponseEvent {
    /// Receiving proxy
    pub target: ProxyAddress,
    /// Answering stub
    pub source: StubAddress,
    pub msg_id: MessageId,
    pub result: ResultType,
    /// Sequence number of the answered request, or
    /// [`SEQUENCE_NUMBER_NOTIFY`] for notifications
    pub seq_nr: u32,
}

impl ServiceResponseEvent {
    pub fn is_remote(&self) -> bool {
        self.source.is_remote() || self.target.is_remote()
    }
}

/// Response, broadcast or attribute update with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub header: ServiceResponseEvent,
    pub data: EventData,
}

impl ResponseEvent {
    pub fn new(
        target: ProxyAddress,
        source: StubAddress,
        msg_id: MessageId,
        result: ResultType,
        seq_nr: u32,
        data: EventData,
    ) -> Self {
        Self {
            header: ServiceResponseEvent {
                target,
                source,
                msg_id,
                result,
                seq_nr,
            },
            data,
        }
    }

    pub fn target(&self) -> &ProxyAddress {
        &self.header.target
    }

    pub fn source(&self) -> &StubAddress {
        &self.header.source
    }

    pub fn msg_id(&self) -> MessageId {
        self.header.msg_id
    }

    pub fn result(&self) -> ResultType {
        self.header.result
    }

    pub fn seq_nr(&self) -> u32 {
        self.header.seq_nr
    }

    pub fn is_notification(&self) -> bool {
        self.header.seq_nr == SEQUENCE_NUMBER_NOTIFY
    }
}
