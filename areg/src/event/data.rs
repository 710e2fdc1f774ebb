//! Serialized event payloads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Argument payload of an event: a sequence of bincode-encoded values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    buffer: Vec<u8>,
}

impl EventData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Payload holding a single value
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let mut data = Self::new();
        data.write_value(value)?;
        Ok(data)
    }

    /// Append a value
    pub fn write_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.buffer, value)?;
        Ok(())
    }

    /// Decode the first value
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        self.stream().read_value()
    }

    /// Reader over the values in write order
    pub fn stream(&self) -> EventDataStream<'_> {
        EventDataStream::new(&self.buffer)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Sequential reader over an encoded byte stream
#[derive(Debug, Clone)]
pub struct EventDataStream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> EventDataStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read_value<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut cursor = &self.data[self.position..];
        let before = cursor.len();
        let value = bincode::deserialize_from(&mut cursor)?;
        self.position += before - cursor.len();
        Ok(value)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }
}
