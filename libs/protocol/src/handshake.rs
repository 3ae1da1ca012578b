//! Handshake frame parsing.
//!
//! The handshake is the first frame a client sends:
//!
//! ```text
//! varint  packet length
//! varint  packet id          (0x00)
//! varint  protocol version
//! string  server address     (varint length + UTF-8, max 255 bytes)
//! u16     server port        (not read)
//! varint  next state         (not read)
//! ```
//!
//! Parsing stops right after the server address. Everything after it belongs to
//! the backend's session and is left in the stream.

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncRead;

use crate::error::HandshakeError;
use crate::varint::{read_string, read_varint, varint_len, write_string, write_varint};

/// Packet id of the handshake frame.
pub const HANDSHAKE_PACKET_ID: u32 = 0x00;

/// Maximum length of the server address field, in bytes.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// The parsed head of a handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub server_address: String,
}

/// Read the handshake head, up to and including the server address.
pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    // Informational only; the fields below carry their own bounds.
    read_varint(reader)
        .await
        .map_err(HandshakeError::PacketLength)?;

    let packet_id = read_varint(reader).await.map_err(HandshakeError::PacketId)?;
    if packet_id != HANDSHAKE_PACKET_ID {
        return Err(HandshakeError::UnexpectedPacketType(packet_id));
    }

    let protocol_version = read_varint(reader)
        .await
        .map_err(HandshakeError::ProtocolVersion)?;

    let server_address = read_string(reader, MAX_HOSTNAME_LEN)
        .await
        .map_err(HandshakeError::ServerAddress)?;

    Ok(Handshake {
        protocol_version,
        server_address,
    })
}

/// Read a handshake and return only the destination hostname.
pub async fn extract_hostname<R>(reader: &mut R) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_handshake(reader).await.map(|h| h.server_address)
}

/// Encode a complete handshake frame, including port and next state.
///
/// Used by clients and tests; the relay itself never re-encodes a handshake.
pub fn encode_handshake(
    protocol_version: u32,
    server_address: &str,
    server_port: u16,
    next_state: u32,
) -> BytesMut {
    let body_len = varint_len(HANDSHAKE_PACKET_ID)
        + varint_len(protocol_version)
        + varint_len(server_address.len() as u32)
        + server_address.len()
        + 2
        + varint_len(next_state);

    let mut buf = BytesMut::with_capacity(varint_len(body_len as u32) + body_len);
    write_varint(&mut buf, body_len as u32);
    write_varint(&mut buf, HANDSHAKE_PACKET_ID);
    write_varint(&mut buf, protocol_version);
    write_string(&mut buf, server_address);
    buf.put_u16(server_port);
    write_varint(&mut buf, next_state);
    buf
}
