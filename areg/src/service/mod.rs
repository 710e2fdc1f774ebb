//! Proxy and stub runtime
//!
//! A [`StubBase`] hosts a [`ServiceStub`] implementation on its dispatcher
//! thread, tracks the proxies listening for each response and attribute, and
//! fans results out. A [`Proxy`] is the client side: it sends requests,
//! manages subscriptions, caches attributes and forwards answers to its
//! [`ProxyClient`]s.

mod proxy;
mod stub;

pub use proxy::{ClientId, Proxy, ProxyClient};
pub use stub::{Listener, ServiceStub, StubBase};

pub(crate) use proxy::ProxyConsumer;
pub(crate) use stub::StubConsumer;
