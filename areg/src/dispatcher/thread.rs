//! Dispatcher threads

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use once_cell::sync::OnceCell;

use super::{ChannelLoss, DispatchContext, EventConsumer, EventFilter, EventQueue};
use crate::event::Event;
use crate::message::ResultType;
use crate::sync::{lock_state, SyncEvent, Timeout, WAIT_INFINITE};
use crate::{Error, ProcessHub, Result};

type Task = Box<dyn FnOnce(&mut DispatchContext) + Send>;

enum Envelope {
    Event(Event),
    Register {
        name: String,
        filters: Vec<EventFilter>,
        consumer: Box<dyn EventConsumer>,
    },
    Unregister(String),
    Task(Task),
    ChannelLost(ChannelLoss),
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Envelope::Register { name, .. } => f.debug_tuple("Register").field(name).finish(),
            Envelope::Unregister(name) => f.debug_tuple("Unregister").field(name).finish(),
            Envelope::Task(_) => f.write_str("Task"),
            Envelope::ChannelLost(loss) => f.debug_tuple("ChannelLost").field(loss).finish(),
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    name: String,
    queue: EventQueue<Envelope>,
    started: SyncEvent,
    running: AtomicBool,
    thread_id: OnceCell<ThreadId>,
    join: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a running dispatcher thread
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    inner: Arc<HandleInner>,
}

impl DispatcherHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the thread still accepts events
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && !self.inner.queue.is_closed()
    }

    /// Whether the calling code runs on this dispatcher thread
    pub fn is_current(&self) -> bool {
        self.inner.thread_id.get() == Some(&thread::current().id())
    }

    /// Wait until the thread entered its loop
    pub fn wait_started(&self, timeout: Timeout) -> bool {
        self.inner.started.wait(timeout)
    }

    pub fn post_event(&self, event: impl Into<Event>) -> Result<()> {
        self.try_post(event.into())
            .map_err(|_| Error::dispatcher_stopped(self.name()))
    }

    /// Queue an event, handing it back if the thread no longer accepts events
    pub(crate) fn try_post(&self, event: Event) -> std::result::Result<(), Event> {
        match self.inner.queue.push(Envelope::Event(event)) {
            Err(Envelope::Event(event)) => Err(event),
            // the queue hands back the envelope it was given
            _ => Ok(()),
        }
    }

    /// Register a consumer under `name`; it receives events matching any of
    /// `filters`, after consumers registered before it
    pub fn register_consumer(
        &self,
        name: impl Into<String>,
        filters: Vec<EventFilter>,
        consumer: Box<dyn EventConsumer>,
    ) -> Result<()> {
        self.push(Envelope::Register {
            name: name.into(),
            filters,
            consumer,
        })
    }

    pub fn unregister_consumer(&self, name: impl Into<String>) -> Result<()> {
        self.push(Envelope::Unregister(name.into()))
    }

    /// Run a closure on the dispatcher thread, in queue order
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut DispatchContext) + Send + 'static,
    {
        self.push(Envelope::Task(Box::new(task)))
    }

    pub(crate) fn notify_channel_lost(&self, loss: ChannelLoss) -> Result<()> {
        self.push(Envelope::ChannelLost(loss))
    }

    fn push(&self, envelope: Envelope) -> Result<()> {
        self.inner
            .queue
            .push(envelope)
            .map_err(|_| Error::dispatcher_stopped(self.name()))
    }

    /// Stop accepting events; the thread cancels what is still queued and
    /// shuts its consumers down
    pub fn stop(&self) {
        if !self.inner.queue.is_closed() {
            tracing::debug!("Stopping dispatcher thread '{}'", self.name());
        }
        self.inner.queue.close();
    }

    /// Wait for the thread to exit. No-op when called from the thread itself.
    pub fn join(&self) {
        if self.is_current() {
            return;
        }
        let handle = lock_state(&self.inner.join).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Dispatcher thread '{}' panicked", self.name());
            }
        }
    }
}

struct Registration {
    name: String,
    filters: Vec<EventFilter>,
    consumer: Box<dyn EventConsumer>,
}

/// Owner of a dispatcher's consumers, running on its thread
pub struct DispatcherThread {
    handle: DispatcherHandle,
    consumers: Vec<Registration>,
    ctx: DispatchContext,
}

impl DispatcherThread {
    /// Spawn a named dispatcher thread
    pub fn start(name: impl Into<String>, hub: &ProcessHub) -> Result<DispatcherHandle> {
        let name = name.into();
        let handle = DispatcherHandle {
            inner: Arc::new(HandleInner {
                name: name.clone(),
                queue: EventQueue::new(),
                started: SyncEvent::manual(false),
                running: AtomicBool::new(true),
                thread_id: OnceCell::new(),
                join: std::sync::Mutex::new(None),
            }),
        };

        let mut dispatcher = DispatcherThread {
            handle: handle.clone(),
            consumers: Vec::new(),
            ctx: DispatchContext::new(hub.clone(), handle.clone()),
        };
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || dispatcher.run())
            .map_err(|e| Error::runtime(format!("failed to spawn dispatcher thread '{name}'"), e))?;

        let _ = handle.inner.thread_id.set(join.thread().id());
        *lock_state(&handle.inner.join) = Some(join);
        Ok(handle)
    }

    fn run(&mut self) {
        tracing::info!("🚀 Dispatcher thread '{}' started", self.handle.name());
        self.handle.inner.started.set();

        while let Some(envelope) = self.handle.inner.queue.pop(WAIT_INFINITE) {
            self.handle_envelope(envelope);
        }

        self.shutdown();
        self.handle.inner.running.store(false, Ordering::Release);
        tracing::info!("🛑 Dispatcher thread '{}' stopped", self.handle.name());
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Event(event) => self.dispatch(event),
            Envelope::Register {
                name,
                filters,
                mut consumer,
            } => {
                tracing::debug!("Registered consumer '{}' on '{}'", name, self.handle.name());
                consumer.on_registered(&mut self.ctx);
                self.consumers.push(Registration {
                    name,
                    filters,
                    consumer,
                });
            }
            Envelope::Unregister(name) => {
                match self.consumers.iter().position(|reg| reg.name == name) {
                    Some(index) => {
                        let mut reg = self.consumers.remove(index);
                        reg.consumer.on_shutdown(&mut self.ctx);
                        tracing::debug!("Unregistered consumer '{}'", name);
                    }
                    None => tracing::debug!("No consumer '{}' to unregister", name),
                }
            }
            Envelope::Task(task) => task(&mut self.ctx),
            Envelope::ChannelLost(loss) => {
                for reg in &mut self.consumers {
                    reg.consumer.on_channel_lost(loss, &mut self.ctx);
                }
            }
        }
    }

    /// Deliver an event to every matching consumer in registration order.
    /// The event is dropped afterwards.
    fn dispatch(&mut self, event: Event) {
        let Self { consumers, ctx, .. } = self;
        let mut delivered = false;
        for reg in consumers.iter_mut() {
            if reg.filters.iter().any(|filter| filter.matches(&event)) {
                reg.consumer.process_event(&event, ctx);
                delivered = true;
            }
        }

        if !delivered {
            match &event {
                Event::Request(request) => {
                    tracing::warn!(
                        "No consumer for request {} to {}",
                        request.msg_id(),
                        request.target()
                    );
                    ctx.hub()
                        .reply_to_request(request, ResultType::MessageUndelivered);
                }
                other => tracing::trace!(
                    "Dropping undelivered {} on '{}'",
                    other.runtime_class(),
                    ctx.thread_name()
                ),
            }
        }
    }

    fn shutdown(&mut self) {
        for envelope in self.handle.inner.queue.drain() {
            match envelope {
                Envelope::Event(Event::Request(request)) => {
                    self.ctx
                        .hub()
                        .reply_to_request(&request, ResultType::RequestCanceled);
                }
                Envelope::Register { mut consumer, .. } => consumer.on_shutdown(&mut self.ctx),
                other => tracing::trace!("Discarding {:?}", other),
            }
        }

        self.consumers.sort_by_key(|reg| reg.consumer.kind());
        for mut reg in self.consumers.drain(..) {
            tracing::debug!("Shutting down consumer '{}'", reg.name);
            reg.consumer.on_shutdown(&mut self.ctx);
        }
    }
}
