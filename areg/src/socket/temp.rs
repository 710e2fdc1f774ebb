use super::{Socket, SocketAddress, WeakSocketHandle};
use crate::{Error, Result};

/// Non-owning view of a socket.
///
/// It never keeps the descriptor alive; operations fail once every owning
/// socket has been closed.
#[derive(Debug, Clone, Default)]
pub struct TempSocket {
    handle: WeakSocketHandle,
    address: SocketAddress,
}

impl TempSocket {
    pub fn new(socket: &Socket) -> Self {
        Self {
            handle: socket
                .handle()
                .map(|handle| handle.downgrade())
                .unwrap_or_default(),
            address: socket.address().clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_alive()
    }

    pub fn address(&self) -> &SocketAddress {
        &self.address
    }

    fn borrow(&self) -> Result<Socket> {
        self.handle
            .upgrade()
            .map(|handle| Socket::from_handle(handle, self.address.clone()))
            .ok_or_else(|| Error::transport_msg("socket was closed by its owners"))
    }

    pub fn send_data(&self, buffer: &[u8]) -> Result<usize> {
        self.borrow()?.send_data(buffer)
    }

    pub fn receive_data(&self, buffer: &mut [u8]) -> Result<usize> {
        self.borrow()?.receive_data(buffer)
    }
}
