use crate::address::{ProxyAddress, StubAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Availability change of a stub, delivered to a proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnectionEvent {
    pub target: ProxyAddress,
    pub stub: StubAddress,
    pub status: ConnectionStatus,
}

impl ServiceConnectionEvent {
    pub fn new(target: ProxyAddress, stub: StubAddress, status: ConnectionStatus) -> Self {
        Self {
            target,
            stub,
            status,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
