//! Base socket shared by all socket variants

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use super::{SocketAddress, SocketHandle};
use crate::{Error, Result};

/// Socket with a shared descriptor.
///
/// Copies share the same descriptor; `close_socket` and drop release only
/// this copy's ownership. Sends and `receive_exact` block until they
/// complete or fail.
#[derive(Debug, Clone, Default)]
pub struct Socket {
    handle: Option<SocketHandle>,
    address: SocketAddress,
}

impl Socket {
    pub(crate) fn from_handle(handle: SocketHandle, address: SocketAddress) -> Self {
        Self {
            handle: Some(handle),
            address,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&SocketHandle> {
        self.handle.as_ref()
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    /// Number of owners of the descriptor, 0 when invalid
    pub fn lock_count(&self) -> usize {
        self.handle.as_ref().map_or(0, SocketHandle::lock_count)
    }

    /// Change the endpoint. A valid socket bound to a different endpoint is
    /// closed so that the next `create_socket` rebinds or reconnects.
    pub fn set_address(&mut self, host: &str, port: u16) -> bool {
        let mut address = SocketAddress::default();
        let resolved = address.resolve(host, port);
        if self.is_valid() && address != self.address {
            self.close_socket();
        }
        self.address = address;
        resolved
    }

    pub(crate) fn set_resolved_address(&mut self, address: SocketAddress) {
        self.address = address;
    }

    pub(crate) fn attach(&mut self, handle: SocketHandle) {
        self.handle = Some(handle);
    }

    /// Send the whole buffer, blocking until done
    pub fn send_data(&self, buffer: &[u8]) -> Result<usize> {
        let mut writer = self.stream("send")?;
        writer
            .write_all(buffer)
            .map_err(|e| Error::transport(format!("send to {} failed", self.address), e))?;
        Ok(buffer.len())
    }

    /// Receive up to `buffer.len()` bytes; `Ok(0)` means the peer closed
    pub fn receive_data(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut reader = self.stream("receive")?;
        loop {
            match reader.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::transport(
                        format!("receive from {} failed", self.address),
                        e,
                    ))
                }
            }
        }
    }

    /// Receive only what has already arrived, without blocking.
    ///
    /// `Ok(None)` means nothing is pending, `Ok(Some(0))` that the peer closed.
    pub fn receive_available(&self, buffer: &mut [u8]) -> Result<Option<usize>> {
        let stream = self.stream("receive")?;
        stream.set_nonblocking(true)?;
        let mut reader = stream;
        let received = loop {
            match reader.read(buffer) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        stream.set_nonblocking(false)?;
        match received {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::transport(
                format!("receive from {} failed", self.address),
                e,
            )),
        }
    }

    /// Bound how long a send may block; `None` waits without limit
    pub fn set_send_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream("configure")?.set_write_timeout(timeout)?;
        Ok(())
    }

    fn stream(&self, operation: &str) -> Result<&TcpStream> {
        self.handle
            .as_ref()
            .and_then(SocketHandle::stream)
            .ok_or_else(|| Error::transport_msg(format!("{operation} on invalid socket")))
    }

    /// Fill `buffer` completely. Returns `Ok(false)` if the peer closed
    /// before the first byte arrived.
    pub fn receive_exact(&self, buffer: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.receive_data(&mut buffer[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::connection_msg(format!(
                    "peer {} closed mid-message after {} of {} bytes",
                    self.address,
                    filled,
                    buffer.len()
                )));
            }
            filled += n;
        }
        Ok(true)
    }

    /// Release this copy's ownership of the descriptor
    pub fn close_socket(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::trace!(
                "Releasing socket {} ({} owners left)",
                handle.id(),
                handle.lock_count() - 1
            );
        }
    }

    /// Shut the connection down for every copy, waking blocked readers
    pub fn shutdown(&self) {
        if let Some(handle) = &self.handle {
            handle.shutdown();
        }
    }
}
