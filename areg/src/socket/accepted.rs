//! Connections accepted by a server socket

use std::net::{SocketAddr, TcpStream};
use std::ops::{Deref, DerefMut};

use super::{Socket, SocketAddress, SocketHandle};

/// Connection handed out by [`ServerSocket`](super::ServerSocket).
///
/// The descriptor already exists, so there is nothing to create.
#[derive(Debug, Clone, Default)]
pub struct AcceptedSocket {
    socket: Socket,
}

impl AcceptedSocket {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            socket: Socket::from_handle(
                SocketHandle::from_stream(stream),
                SocketAddress::from_socket_addr(peer),
            ),
        }
    }

    pub fn peer_address(&self) -> &SocketAddress {
        self.socket.address()
    }

    /// Reports whether the accepted descriptor is still owned
    pub fn create_socket(&self) -> bool {
        self.socket.is_valid()
    }
}

impl Deref for AcceptedSocket {
    type Target = Socket;

    fn deref(&self) -> &Socket {
        &self.socket
    }
}

impl DerefMut for AcceptedSocket {
    fn deref_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}
