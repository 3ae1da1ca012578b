//! Decoder and handshake error types.

use std::io;

use thiserror::Error;

/// Whether an I/O error just means the other side went away.
///
/// Shared by handshake classification and the relay, which treats these as a
/// normal end of a copy direction.
pub fn is_connection_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Errors from the varint and string decoders.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The varint ran past 5 groups or does not fit in 32 bits.
    #[error("malformed varint: over {max_bytes} bytes or wider than 32 bits")]
    MalformedVarInt { max_bytes: usize },

    /// A declared string length is over the caller's bound.
    #[error("string too long: {len} > {max}")]
    StringTooLong { len: u32, max: usize },

    /// The string payload is not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8(#[source] std::string::FromUtf8Error),

    /// The byte source failed. End-of-stream shows up here as `UnexpectedEof`.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Returns the underlying I/O error, if this is one.
    pub fn as_io(&self) -> Option<&io::Error> {
        match self {
            DecodeError::Io(e) => Some(e),
            _ => None,
        }
    }

    /// True when the source ran out of bytes before the value was complete.
    pub fn is_eof(&self) -> bool {
        self.as_io()
            .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Errors from handshake extraction, labelled with the field being read.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("reading packet length: {0}")]
    PacketLength(#[source] DecodeError),

    #[error("reading packet id: {0}")]
    PacketId(#[source] DecodeError),

    /// The first frame is not a handshake.
    #[error("not a handshake packet, id: 0x{0:02X}")]
    UnexpectedPacketType(u32),

    #[error("reading protocol version: {0}")]
    ProtocolVersion(#[source] DecodeError),

    #[error("reading server address: {0}")]
    ServerAddress(#[source] DecodeError),
}

impl HandshakeError {
    /// The decoder error behind this failure, if any.
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            HandshakeError::PacketLength(e)
            | HandshakeError::PacketId(e)
            | HandshakeError::ProtocolVersion(e)
            | HandshakeError::ServerAddress(e) => Some(e),
            HandshakeError::UnexpectedPacketType(_) => None,
        }
    }

    /// True when the peer went away mid-handshake rather than sending bad data.
    pub fn is_disconnect(&self) -> bool {
        self.decode_error()
            .and_then(DecodeError::as_io)
            .is_some_and(is_connection_closed)
    }

    /// Short reason code for logs and counters.
    pub fn reason_code(&self) -> &'static str {
        match self {
            HandshakeError::UnexpectedPacketType(_) => "unexpected_packet_type",
            _ if self.is_disconnect() => "disconnected",
            _ => match self.decode_error() {
                Some(DecodeError::MalformedVarInt { .. }) => "malformed_varint",
                Some(DecodeError::StringTooLong { .. }) => "string_too_long",
                Some(DecodeError::InvalidUtf8(_)) => "invalid_utf8",
                _ => "io_error",
            },
        }
    }
}
