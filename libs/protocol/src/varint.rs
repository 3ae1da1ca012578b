//! VarInt and length-prefixed string coding.
//!
//! A varint is a sequence of 7-bit groups, least significant first. The high bit
//! of each byte is set when another byte follows. Values are bounded to 32 bits,
//! so at most 5 bytes are ever read for one varint.
//!
//! The readers pull one byte at a time and never look past the end of the value,
//! which keeps the rest of the stream untouched for whoever reads next.

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DecodeError;

/// Longest legal varint encoding, in bytes.
pub const MAX_VARINT_BYTES: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Read one varint.
///
/// Fails with [`DecodeError::MalformedVarInt`] as soon as the fifth byte still
/// carries a continuation bit, or when the value does not fit in 32 bits. I/O
/// errors (including EOF) are returned as-is.
pub async fn read_varint<R>(reader: &mut R) -> Result<u32, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    // Wider than the result so a fifth group's high bits are seen, not dropped.
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = reader.read_u8().await?;
        value |= u64::from(byte & SEGMENT_BITS) << shift;

        if byte & CONTINUE_BIT == 0 {
            return u32::try_from(value).map_err(|_| DecodeError::MalformedVarInt {
                max_bytes: MAX_VARINT_BYTES,
            });
        }

        shift += 7;
        if shift >= 32 {
            return Err(DecodeError::MalformedVarInt {
                max_bytes: MAX_VARINT_BYTES,
            });
        }
    }
}

/// Read a varint-length-prefixed UTF-8 string of at most `max_len` bytes.
///
/// The length is checked before any payload byte is read. A payload shorter than
/// declared is an `UnexpectedEof` error, not a truncated string.
pub async fn read_string<R>(reader: &mut R, max_len: usize) -> Result<String, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = read_varint(reader).await?;
    if len as usize > max_len {
        return Err(DecodeError::StringTooLong { len, max: max_len });
    }

    if len == 0 {
        return Ok(String::new());
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;

    String::from_utf8(data).map_err(DecodeError::InvalidUtf8)
}

/// Append the varint encoding of `value`.
pub fn write_varint<B: BufMut>(buf: &mut B, mut value: u32) {
    loop {
        let byte = (value as u8) & SEGMENT_BITS;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | CONTINUE_BIT);
    }
}

/// Append a varint length prefix followed by the string bytes.
pub fn write_string<B: BufMut>(buf: &mut B, value: &str) {
    write_varint(buf, value.len() as u32);
    buf.put_slice(value.as_bytes());
}

/// Number of bytes `write_varint` produces for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}
