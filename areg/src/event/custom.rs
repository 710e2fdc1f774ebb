use std::any::Any;
use std::fmt;

use super::classes::CUSTOM_EVENT;
use crate::rtti::RuntimeClass;

/// User-defined event with its own class and an arbitrary payload
pub struct CustomEvent {
    class: &'static RuntimeClass,
    target: Option<String>,
    payload: Box<dyn Any + Send>,
}

impl CustomEvent {
    /// Event of class `class`, which should derive from `CustomEvent`
    pub fn new<T: Any + Send>(class: &'static RuntimeClass, payload: T) -> Self {
        if !class.is_instance_of(&CUSTOM_EVENT) {
            tracing::warn!("Custom event class {} does not derive from CustomEvent", class);
        }
        Self {
            class,
            target: None,
            payload: Box::new(payload),
        }
    }

    /// Deliver only to the consumer registered under `name`
    pub fn with_target(mut self, name: impl Into<String>) -> Self {
        self.target = Some(name.into());
        self
    }

    pub fn class(&self) -> &'static RuntimeClass {
        self.class
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEvent")
            .field("class", &self.class.name())
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
