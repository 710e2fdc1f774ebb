//! Outgoing connections

use std::net::TcpStream;
use std::ops::{Deref, DerefMut};

use super::{Socket, SocketAddress, SocketHandle};
use crate::{Error, Result};

/// Socket that connects to a remote endpoint
#[derive(Debug, Clone, Default)]
pub struct ClientSocket {
    socket: Socket,
}

impl ClientSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket targeting `host:port`, not yet connected
    pub fn with_address(host: &str, port: u16) -> Self {
        let mut client = Self::default();
        client.socket.set_address(host, port);
        client
    }

    /// Set the endpoint and connect
    pub fn create_socket_at(&mut self, host: &str, port: u16) -> Result<()> {
        if !self.socket.set_address(host, port) {
            return Err(Error::connection_msg(format!(
                "cannot resolve {host}:{port}"
            )));
        }
        self.create_socket()
    }

    /// Connect to the configured endpoint; no-op when already connected
    pub fn create_socket(&mut self) -> Result<()> {
        if self.socket.is_valid() {
            return Ok(());
        }
        let addr = self
            .socket
            .address()
            .socket_addr()
            .ok_or_else(|| Error::connection_msg("client socket has no resolved address"))?;

        let stream = TcpStream::connect(addr)
            .map_err(|e| Error::connection(format!("connect to {addr} failed"), e))?;
        stream.set_nodelay(true)?;
        tracing::debug!("🔗 Connected to {}", addr);

        self.socket.attach(SocketHandle::from_stream(stream));
        Ok(())
    }

    pub fn resolved(&self) -> &SocketAddress {
        self.socket.address()
    }
}

impl Deref for ClientSocket {
    type Target = Socket;

    fn deref(&self) -> &Socket {
        &self.socket
    }
}

impl DerefMut for ClientSocket {
    fn deref_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}
