//! Handshake decoding for mcrelay.
//!
//! This crate provides:
//! - VarInt and length-prefixed string readers that never over-read a stream
//! - Handshake parsing that stops at the server address field
//! - Reference encoders for building handshake frames

pub mod error;
pub mod handshake;
pub mod varint;

pub use error::{is_connection_closed, DecodeError, HandshakeError};
pub use handshake::{
    encode_handshake, extract_hostname, read_handshake, Handshake, HANDSHAKE_PACKET_ID,
    MAX_HOSTNAME_LEN,
};
pub use varint::{read_string, read_varint, varint_len, write_string, write_varint, MAX_VARINT_BYTES};
