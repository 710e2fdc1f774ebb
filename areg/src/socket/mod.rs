//! Blocking TCP sockets with shared descriptors
//!
//! [`SocketHandle`] is the reference-counted OS descriptor; every socket
//! variant wraps a [`Socket`] holding one owner of it. [`ClientSocket`]
//! connects out, [`ServerSocket`] binds, listens and multiplexes a master
//! list of accepted connections, [`AcceptedSocket`] is a connection handed
//! out by the server and [`TempSocket`] is a non-owning view.

mod accepted;
mod address;
mod client;
mod handle;
mod server;
#[allow(clippy::module_inception)]
mod socket;
mod temp;

pub use accepted::AcceptedSocket;
pub use address::SocketAddress;
pub use client::ClientSocket;
pub use handle::{SocketHandle, WeakSocketHandle};
pub use server::ServerSocket;
pub use socket::Socket;
pub use temp::TempSocket;

/// Upper bound of the listen queue accepted by [`ServerSocket::listen_connection`]
pub const MAXIMUM_LISTEN_QUEUE_SIZE: i32 = 128;

/// Result of waiting on a server socket and its master list
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A new client connected
    Accepted(AcceptedSocket),
    /// The connection has data to read or was closed by the peer; a read
    /// returning 0 bytes tells the two apart
    Activity(SocketHandle),
}
