//! Dispatcher threads and event routing to consumers
//!
//! Each dispatcher owns a FIFO [`EventQueue`] and a list of registered
//! [`EventConsumer`]s. Events posted from any thread are delivered on the
//! dispatcher thread to every consumer whose [`EventFilter`] matches, in
//! registration order.

mod consumer;
mod queue;
mod thread;

pub use consumer::{
    AddressFilter, ChannelLoss, ConsumerKind, DispatchContext, EventConsumer, EventFilter,
};
pub use queue::EventQueue;
pub use thread::{DispatcherHandle, DispatcherThread};
