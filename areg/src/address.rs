//! Proxy and stub addressing

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Version;

/// Connection identity of an address.
///
/// Local addresses use [`Channel::LOCAL`]; remote ones carry the cookies the
/// router assigned to the source and target processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub source: u64,
    pub target: u64,
    pub cookie: u64,
}

impl Channel {
    /// Cookie of the owning process itself
    pub const COOKIE_LOCAL: u64 = 1;
    /// Cookie of the router
    pub const COOKIE_ROUTER: u64 = 2;
    /// First cookie the router hands out to a connected process
    pub const COOKIE_FIRST_REMOTE: u64 = 256;

    pub const LOCAL: Channel = Channel {
        source: 0,
        target: 0,
        cookie: Self::COOKIE_LOCAL,
    };

    pub const INVALID: Channel = Channel {
        source: 0,
        target: 0,
        cookie: 0,
    };

    /// Channel reaching the process identified by `cookie` through the router
    pub const fn remote(source: u64, target: u64, cookie: u64) -> Self {
        Self {
            source,
            target,
            cookie,
        }
    }

    pub fn is_local(&self) -> bool {
        self.cookie == Self::COOKIE_LOCAL
    }

    pub fn is_remote(&self) -> bool {
        self.cookie >= Self::COOKIE_FIRST_REMOTE
    }

    pub fn is_valid(&self) -> bool {
        self.cookie != 0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::LOCAL
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            f.write_str("local")
        } else {
            write!(f, "{}->{}#{}", self.source, self.target, self.cookie)
        }
    }
}

/// Whether a service is visible to other processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceKind {
    #[default]
    Local,
    Public,
}

/// Service identity: interface name, version and visibility
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceItem {
    pub name: String,
    pub version: Version,
    pub kind: ServiceKind,
}

impl ServiceItem {
    pub fn new(name: impl Into<String>, version: Version, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            version,
            kind,
        }
    }

    pub fn is_public(&self) -> bool {
        self.kind == ServiceKind::Public
    }
}

/// Address of a stub (service provider).
///
/// A process hosts at most one stub per service and role. Equality is exact
/// over every field including the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StubAddress {
    pub service: ServiceItem,
    pub role: String,
    pub thread: String,
    pub channel: Channel,
}

impl StubAddress {
    pub fn new(service: ServiceItem, role: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            service,
            role: role.into(),
            thread: thread.into(),
            channel: Channel::LOCAL,
        }
    }

    pub fn is_local(&self) -> bool {
        self.channel.is_local()
    }

    pub fn is_remote(&self) -> bool {
        self.channel.is_remote()
    }

    pub fn is_valid(&self) -> bool {
        !self.role.is_empty() && !self.service.name.is_empty() && self.channel.is_valid()
    }

    /// Same stub ignoring the channel
    pub fn same_endpoint(&self, other: &StubAddress) -> bool {
        self.role == other.role && self.thread == other.thread && self.service.name == other.service.name
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }
}

impl fmt::Display for StubAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stub {}::{} on '{}' [{}]",
            self.service.name, self.role, self.thread, self.channel
        )
    }
}

/// Address of a proxy (service consumer).
///
/// A process holds at most one proxy per (role, thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub service: ServiceItem,
    pub role: String,
    pub thread: String,
    pub channel: Channel,
}

impl ProxyAddress {
    pub fn new(service: ServiceItem, role: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            service,
            role: role.into(),
            thread: thread.into(),
            channel: Channel::LOCAL,
        }
    }

    pub fn is_local(&self) -> bool {
        self.channel.is_local()
    }

    pub fn is_remote(&self) -> bool {
        self.channel.is_remote()
    }

    pub fn is_valid(&self) -> bool {
        !self.role.is_empty() && !self.thread.is_empty() && self.channel.is_valid()
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Whether this proxy is meant to talk to `stub`
    pub fn targets(&self, stub: &StubAddress) -> bool {
        self.role == stub.role && self.service.name == stub.service.name
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxy {}::{} on '{}' [{}]",
            self.service.name, self.role, self.thread, self.channel
        )
    }
}
