//! Remote transport: router wire protocol, the router broker and the
//! per-process bridge to it.
//!
//! Every frame on a router connection is laid out as
//!
//! ```text
//! | 4 bytes | 4 bytes | N bytes                |
//! | MAGIC   | N       | bincode(RouterMessage) |
//! ```
//!
//! with both integers big-endian.

mod client;
mod server;

pub use client::RouterClient;
pub use server::RouterServer;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::{Channel, StubAddress};
use crate::event::RemoteEvent;
use crate::socket::Socket;
use crate::{Error, Result};

/// Frame marker, "AREG"
pub const MAGIC: u32 = 0x4152_4547;

/// Largest accepted frame body
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 8;

/// Messages exchanged between a process and the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterMessage {
    /// First frame a process sends
    Connect { name: String, instance: Uuid },
    /// Router reply carrying the cookie assigned to the process
    ConnectAccepted { cookie: u64 },
    /// A public stub started in the sending process
    RegisterStub(StubAddress),
    /// A public stub stopped in the sending process
    UnregisterStub(StubAddress),
    /// A public stub of another process became available
    StubAvailable(StubAddress),
    /// A public stub of another process went away
    StubUnavailable(StubAddress),
    /// A process lost its router connection
    PeerDisconnected { cookie: u64 },
    /// Routed service event
    Event(RemoteEvent),
}

/// Encode a message into a complete frame
pub fn encode_frame(message: &RouterMessage) -> Result<Vec<u8>> {
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::protocol(
            "frame too large",
            Some(format!("<= {MAX_FRAME_SIZE}")),
            Some(body.len().to_string()),
        ));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parse the header of a frame, returning the body length
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<usize> {
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(Error::protocol(
            "bad frame marker",
            Some(format!("{MAGIC:#010x}")),
            Some(format!("{magic:#010x}")),
        ));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::protocol(
            "frame too large",
            Some(format!("<= {MAX_FRAME_SIZE}")),
            Some(len.to_string()),
        ));
    }
    Ok(len)
}

/// Write one frame
pub fn write_frame(socket: &Socket, message: &RouterMessage) -> Result<()> {
    let frame = encode_frame(message)?;
    socket.send_data(&frame)?;
    Ok(())
}

/// Assembles frames from bytes read piecemeal off a connection
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame, `Ok(None)` while more bytes are needed.
    /// A bad header is reported as soon as it is complete.
    pub fn next_frame(&mut self) -> Result<Option<RouterMessage>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&self.buffer[..HEADER_SIZE]);
        let end = HEADER_SIZE + decode_header(&header)?;
        if self.buffer.len() < end {
            return Ok(None);
        }
        let message = bincode::deserialize(&self.buffer[HEADER_SIZE..end])?;
        self.buffer.drain(..end);
        Ok(Some(message))
    }
}

/// Read one frame. `Ok(None)` means the peer closed between frames.
pub fn read_frame(socket: &Socket) -> Result<Option<RouterMessage>> {
    let mut header = [0u8; HEADER_SIZE];
    if !socket.receive_exact(&mut header)? {
        return Ok(None);
    }
    let len = decode_header(&header)?;
    let mut body = vec![0u8; len];
    if !socket.receive_exact(&mut body)? {
        return Err(Error::connection_msg(format!(
            "peer {} closed before frame body",
            socket.address()
        )));
    }
    Ok(Some(bincode::deserialize(&body)?))
}

/// Channel through which a process with cookie `own` reaches the process
/// with cookie `peer`
pub fn peer_channel(peer: u64, own: u64) -> Channel {
    Channel::remote(peer, own, peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{ServiceItem, ServiceKind};
    use crate::message::Version;

    #[test]
    fn test_frame_layout() {
        let message = RouterMessage::ConnectAccepted { cookie: 300 };
        let frame = encode_frame(&message).unwrap();
        assert_eq!(&frame[..4], &MAGIC.to_be_bytes());
        let header: [u8; HEADER_SIZE] = frame[..HEADER_SIZE].try_into().unwrap();
        assert_eq!(decode_header(&header).unwrap(), frame.len() - HEADER_SIZE);

        let decoded: RouterMessage = bincode::deserialize(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_bad_header_is_protocol_error() {
        let mut header = [0u8; HEADER_SIZE];
        assert!(matches!(
            decode_header(&header),
            Err(Error::Protocol { .. })
        ));

        header[..4].copy_from_slice(&MAGIC.to_be_bytes());
        header[4..].copy_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(
            decode_header(&header),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_stub_address_survives_framing() {
        let service = ServiceItem::new("Clock", Version::new(2, 1, 0), ServiceKind::Public);
        let address =
            StubAddress::new(service, "clock", "worker").with_channel(peer_channel(300, 256));
        let frame = encode_frame(&RouterMessage::StubAvailable(address.clone())).unwrap();
        let decoded: RouterMessage = bincode::deserialize(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(decoded, RouterMessage::StubAvailable(address));
    }

    #[test]
    fn test_frame_reader_waits_for_whole_frames() {
        let first = encode_frame(&RouterMessage::ConnectAccepted { cookie: 257 }).unwrap();
        let second = encode_frame(&RouterMessage::PeerDisconnected { cookie: 300 }).unwrap();
        let mut reader = FrameReader::new();

        reader.extend(&first[..5]);
        assert_eq!(reader.next_frame().unwrap(), None);
        reader.extend(&first[5..first.len() - 1]);
        assert_eq!(reader.next_frame().unwrap(), None);

        let mut rest = first[first.len() - 1..].to_vec();
        rest.extend_from_slice(&second);
        reader.extend(&rest);
        assert_eq!(
            reader.next_frame().unwrap(),
            Some(RouterMessage::ConnectAccepted { cookie: 257 })
        );
        assert_eq!(
            reader.next_frame().unwrap(),
            Some(RouterMessage::PeerDisconnected { cookie: 300 })
        );
        assert_eq!(reader.next_frame().unwrap(), None);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_frame_reader_rejects_bad_marker_early() {
        let mut reader = FrameReader::new();
        reader.extend(b"GET / HTTP/1.1");
        assert!(matches!(reader.next_frame(), Err(Error::Protocol { .. })));
    }
}
