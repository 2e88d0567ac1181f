//! Packet Codec
//!
//! Stateless conversion between framed bytes and typed packets.
//!
//! The decoder follows the same contract as an incremental parser:
//!
//! - `Ok(Some((packet, consumed)))` - a whole packet was available
//! - `Ok(None)` - not enough bytes yet, retry after the next read
//! - `Err(DecodeError)` - the bytes violate the protocol
//!
//! Decoding never consumes input. The caller decides whether the bytes are
//! dropped or relayed untouched to the other side of the session.

use crate::buffer::Buffer;
use crate::protocol::packet::{read_frame, write_frames};
use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Errors raised while decoding MySQL packets.
///
/// Every variant is a protocol violation; running out of input is not an
/// error (it is `Ok(None)`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A frame carried an unexpected sequence id
    #[error("sequence id mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    /// A packet body did not match its layout
    #[error("malformed {packet} packet: {reason}")]
    Malformed {
        packet: &'static str,
        reason: &'static str,
    },

    /// A packet of the wrong kind arrived for the current phase
    #[error("unexpected packet 0x{header:02x} while {phase}")]
    UnexpectedPacket { header: u8, phase: &'static str },

    /// A valid but unsupported protocol feature was requested
    #[error("unsupported protocol feature: {0}")]
    Unsupported(&'static str),

    /// A packet that must fit in one frame spanned several
    #[error("{0} packet exceeds a single frame")]
    Oversized(&'static str),
}

/// Errors raised while encoding packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The destination buffer has no room for the packet
    #[error("buffer full: need {needed} bytes, {available} available")]
    BufferFull { needed: usize, available: usize },
}

/// A packet that can be parsed from a single frame payload.
pub trait Decode: Sized {
    /// Packet name used in error messages.
    const NAME: &'static str;

    /// Parses the payload of one frame.
    fn decode_payload(sequence_id: u8, payload: &[u8]) -> Result<Self, DecodeError>;
}

/// A packet that can be serialized into frames.
pub trait Encode {
    /// The sequence id of the first frame.
    fn sequence_id(&self) -> u8;

    /// Appends the packet payload (without frame headers).
    fn encode_payload(&self, dst: &mut BytesMut);
}

/// Decodes one packet from the start of `src` without consuming it.
pub fn decode<P: Decode>(src: &[u8]) -> Result<Option<(P, usize)>, DecodeError> {
    match read_frame(src) {
        Some(frame) if frame.is_continued() => Err(DecodeError::Oversized(P::NAME)),
        Some(frame) => {
            let packet = P::decode_payload(frame.sequence_id, frame.payload)?;
            Ok(Some((packet, frame.len())))
        }
        None => Ok(None),
    }
}

/// Appends the framed wire representation of `packet` to `dst`.
pub fn encode<P: Encode>(packet: &P, dst: &mut Buffer) -> Result<(), EncodeError> {
    let mut payload = BytesMut::new();
    packet.encode_payload(&mut payload);

    let mut framed = BytesMut::with_capacity(payload.len() + 4);
    write_frames(packet.sequence_id(), &payload, &mut framed);

    if !dst.put_slice(&framed) {
        return Err(EncodeError::BufferFull {
            needed: framed.len(),
            available: dst.writable(),
        });
    }
    Ok(())
}

/// Reads a length-encoded integer, or `None` if `buf` is too short or
/// holds the `0xFB`/`0xFF` markers.
pub fn get_lenenc_int(buf: &mut &[u8]) -> Option<u64> {
    if !buf.has_remaining() {
        return None;
    }
    let first = buf.get_u8();
    match first {
        0x00..=0xFA => Some(first as u64),
        0xFC if buf.remaining() >= 2 => Some(buf.get_u16_le() as u64),
        0xFD if buf.remaining() >= 3 => Some(buf.get_uint_le(3)),
        0xFE if buf.remaining() >= 8 => Some(buf.get_u64_le()),
        _ => None,
    }
}

/// Reads a NUL-terminated string, consuming the terminator.
pub fn get_null_terminated<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let src: &'a [u8] = *buf;
    let end = src.iter().position(|&b| b == 0)?;
    *buf = &src[end + 1..];
    Some(&src[..end])
}

/// Reads a string prefixed by a length-encoded integer.
pub fn get_lenenc_bytes<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = get_lenenc_int(buf)? as usize;
    let src: &'a [u8] = *buf;
    if src.len() < len {
        return None;
    }
    *buf = &src[len..];
    Some(&src[..len])
}
