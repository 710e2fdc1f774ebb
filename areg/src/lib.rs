//! # areg - Event-driven service dispatch and remote messaging
//!
//! Components expose versioned service interfaces made of requests,
//! responses, broadcasts and attributes. A stub provides a service, proxies
//! consume it. Both live on dispatcher threads and talk only by posting
//! events: within a process through the dispatcher queues, across
//! processes through a message router over TCP.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use areg::{
//!     EventData, MessageId, ProcessHub, RequestEvent, Result, ServiceInterface, ServiceStub,
//!     StubBase, Version,
//! };
//! use areg::sync::Timeout;
//!
//! const REQ_ADD: MessageId = MessageId::request(0);
//! const RESP_ADD: MessageId = MessageId::response(0);
//!
//! struct Calculator;
//!
//! impl ServiceStub for Calculator {
//!     fn process_request(&mut self, stub: &mut StubBase, request: &RequestEvent) -> Result<()> {
//!         let (a, b): (i32, i32) = request.data.value()?;
//!         stub.send_response(RESP_ADD, EventData::from_value(&(a + b))?);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let interface = Arc::new(
//!         ServiceInterface::builder("Calculator", Version::new(1, 0, 0))
//!             .request(REQ_ADD, Some(RESP_ADD))
//!             .response(RESP_ADD)
//!             .build()?,
//!     );
//!
//!     let hub = ProcessHub::new("demo");
//!     hub.start_thread("worker")?;
//!     hub.start_thread("client")?;
//!     hub.start_stub("worker", "calc", interface.clone(), Calculator)?;
//!
//!     let proxy = hub.create_proxy("client", "calc", interface)?;
//!     assert!(proxy.wait_connected(Timeout::Millis(5000)));
//!     let response = proxy.call_blocking(
//!         REQ_ADD,
//!         EventData::from_value(&(2, 3))?,
//!         Duration::from_secs(5),
//!     )?;
//!     assert_eq!(response.data.value::<i32>()?, 5);
//!
//!     hub.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Remote services
//!
//! Start a [`RouterServer`] and build each process hub with a
//! [`RemoteConfig`] pointing at it. Stubs of [public](ServiceKind::Public)
//! interfaces are announced through the router and proxies in other
//! processes connect to them as if they were local.

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod hub;
pub mod interface;
pub mod message;
pub mod model;
pub mod rtti;
pub mod service;
pub mod socket;
pub mod sync;
pub mod transport;


#[cfg(test)]
mod error_tests;

// Re-exports
pub use address::{Channel, ProxyAddress, ServiceItem, ServiceKind, StubAddress};
pub use config::RemoteConfig;
pub use dispatcher::{
    AddressFilter, DispatchContext, DispatcherHandle, EventConsumer, EventFilter,
};
pub use error::{Error, Result};
pub use event::{
    ConnectionStatus, CustomEvent, Event, EventData, EventType, NotifyRequestEvent, RemoteEvent,
    RequestEvent, ResponseEvent, ServiceConnectionEvent,
};
pub use hub::{ProcessHub, ProcessHubBuilder, ServiceKey, WeakProcessHub};
pub use interface::{ServiceInterface, ServiceInterfaceBuilder};
pub use message::{DataState, MessageId, RequestType, ResultType, Version};
pub use model::{ComponentModel, ComponentSpec, ModelBuilder};
pub use rtti::{ClassRegistry, RuntimeClass, RuntimeObject};
pub use service::{ClientId, Proxy, ProxyClient, ServiceStub, StubBase};
pub use transport::{RouterClient, RouterServer};

// Re-export commonly used dependencies
pub use bincode;
pub use serde::{Deserialize, Serialize};
