//! MySQL Packet Framing
//!
//! Every MySQL packet travels as one or more frames:
//!
//! ```text
//! ┌──────────────┬─────────────┬──────────────────────────┐
//! │ length (u24) │ sequence id │ payload (length bytes)   │
//! └──────────────┴─────────────┴──────────────────────────┘
//! ```
//!
//! A frame whose payload is exactly `0xFFFFFF` bytes long is followed by
//! another frame of the same logical packet; the packet ends with the first
//! shorter frame (possibly empty). Sequence ids increase by one per frame.
//!
//! ## Incremental Scanning
//!
//! [`PacketScanner`] walks frames as bytes trickle in, without buffering
//! payloads. It keeps enough of the first frame ([`PacketHead`]) to classify
//! the packet and reports how many bytes the packet is known to span, which
//! is what the relay counters are built on.

use crate::protocol::codec::DecodeError;
use bytes::{BufMut, BytesMut};

/// Size of a frame header.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Number of leading payload bytes kept in a [`PacketHead`].
///
/// Large enough for an OK packet's two length-encoded integers and status flags.
pub const HEAD_LEN: usize = 32;

/// A complete frame borrowed from a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub sequence_id: u8,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Bytes occupied on the wire, header included.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// True if another frame of the same packet follows.
    pub fn is_continued(&self) -> bool {
        self.payload.len() == MAX_PAYLOAD_LEN
    }
}

/// Returns the frame at the start of `src`, if it is complete.
pub fn read_frame(src: &[u8]) -> Option<Frame<'_>> {
    if src.len() < HEADER_LEN {
        return None;
    }
    let len = payload_len(&src[..HEADER_LEN]);
    if src.len() < HEADER_LEN + len {
        return None;
    }
    Some(Frame {
        sequence_id: src[3],
        payload: &src[HEADER_LEN..HEADER_LEN + len],
    })
}

/// Appends `payload` as one logical packet, split into as many frames as needed.
///
/// Returns the sequence id of the last frame written.
pub fn write_frames(first_sequence_id: u8, payload: &[u8], dst: &mut BytesMut) -> u8 {
    let mut sequence_id = first_sequence_id;
    let mut rest = payload;

    loop {
        let len = rest.len().min(MAX_PAYLOAD_LEN);
        dst.reserve(HEADER_LEN + len);
        dst.put_uint_le(len as u64, 3);
        dst.put_u8(sequence_id);
        dst.put_slice(&rest[..len]);
        rest = &rest[len..];

        if len < MAX_PAYLOAD_LEN {
            return sequence_id;
        }
        sequence_id = sequence_id.wrapping_add(1);
    }
}

fn payload_len(header: &[u8]) -> usize {
    header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16
}

/// The first frame header and leading payload bytes of a logical packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHead {
    /// Sequence id of the first frame
    pub sequence_id: u8,
    /// Payload length of the first frame
    pub payload_len: usize,
    bytes: [u8; HEAD_LEN],
    len: usize,
}

impl PacketHead {
    fn new(sequence_id: u8, payload_len: usize) -> Self {
        Self {
            sequence_id,
            payload_len,
            bytes: [0; HEAD_LEN],
            len: 0,
        }
    }

    /// The leading payload bytes (at most [`HEAD_LEN`]).
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The first payload byte: a command code or a response header.
    pub fn first_byte(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    /// True once all the bytes this head will ever hold have been seen.
    fn is_filled(&self) -> bool {
        self.len == self.payload_len.min(HEAD_LEN)
    }
}

/// Incremental scanner for one logical packet at a time.
///
/// ```text
/// expect_packet() ──> [header] ──> [payload] ──┬──> done (short frame)
///                        ▲                      │
///                        └──── 0xFFFFFF frame ──┘
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketScanner {
    /// A packet has been requested and is not finished yet
    awaiting: bool,
    /// At least one byte of the current packet has been consumed
    started: bool,
    /// Sequence id the next frame header must carry, if checked
    next_sequence: Option<u8>,
    header: [u8; HEADER_LEN],
    header_len: usize,
    /// Payload bytes left in the current frame
    frame_remaining: usize,
    /// The current frame is full-size, so another one follows
    continued: bool,
    /// The current frame is the first of its packet
    first_frame: bool,
    head: Option<PacketHead>,
    last_sequence: Option<u8>,
    /// Bytes consumed since the last reset
    scanned: u64,
}

impl PacketScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all progress, including the scanned byte count.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Arms the scanner for the next logical packet.
    ///
    /// When `sequence_id` is given, the first frame must carry it.
    pub fn expect_packet(&mut self, sequence_id: Option<u8>) {
        debug_assert!(!self.started || !self.awaiting, "packet still in progress");
        self.awaiting = true;
        self.started = false;
        self.next_sequence = sequence_id;
        self.header_len = 0;
        self.frame_remaining = 0;
        self.continued = false;
        self.first_frame = true;
        self.head = None;
    }

    /// True while a packet is expected and not yet complete.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    /// True if no packet is partially consumed.
    pub fn is_at_boundary(&self) -> bool {
        !self.awaiting || !self.started
    }

    /// The head of the current (or just completed) packet, once its
    /// leading bytes have arrived.
    pub fn head(&self) -> Option<&PacketHead> {
        self.head.as_ref().filter(|head| head.is_filled())
    }

    /// Sequence id of the last complete frame header.
    pub fn last_sequence(&self) -> Option<u8> {
        self.last_sequence
    }

    /// Bytes consumed since the last reset.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Bytes the current packet is known to still need.
    ///
    /// Grows when a header reveals its payload length and by one header
    /// when a full-size frame announces a continuation.
    pub fn outstanding(&self) -> u64 {
        if !self.awaiting {
            0
        } else if self.header_len < HEADER_LEN {
            (HEADER_LEN - self.header_len) as u64
        } else {
            let next_header = if self.continued { HEADER_LEN } else { 0 };
            (self.frame_remaining + next_header) as u64
        }
    }

    /// Bytes scanned plus bytes still outstanding. Never decreases.
    pub fn expected(&self) -> u64 {
        self.scanned + self.outstanding()
    }

    /// Consumes bytes of the current packet from `data`.
    ///
    /// Stops at the end of the packet or of the input. Returns the number of
    /// bytes consumed and, if the packet completed, its head.
    pub fn scan(&mut self, data: &[u8]) -> Result<(usize, Option<PacketHead>), DecodeError> {
        let mut pos = 0;

        while self.awaiting && pos < data.len() {
            self.started = true;

            if self.header_len < HEADER_LEN {
                let n = (HEADER_LEN - self.header_len).min(data.len() - pos);
                self.header[self.header_len..self.header_len + n]
                    .copy_from_slice(&data[pos..pos + n]);
                self.header_len += n;
                pos += n;

                if self.header_len < HEADER_LEN {
                    break;
                }
                self.start_frame()?;
            }

            let n = self.frame_remaining.min(data.len() - pos);
            if self.first_frame {
                if let Some(head) = self.head.as_mut() {
                    let take = n.min(HEAD_LEN - head.len);
                    head.bytes[head.len..head.len + take].copy_from_slice(&data[pos..pos + take]);
                    head.len += take;
                }
            }
            pos += n;
            self.frame_remaining -= n;

            if self.frame_remaining == 0 {
                if self.continued {
                    self.header_len = 0;
                    self.continued = false;
                    self.first_frame = false;
                } else {
                    self.awaiting = false;
                    self.started = false;
                    self.scanned += pos as u64;
                    return Ok((pos, self.head));
                }
            }
        }

        self.scanned += pos as u64;
        Ok((pos, None))
    }

    fn start_frame(&mut self) -> Result<(), DecodeError> {
        let sequence_id = self.header[3];
        if let Some(expected) = self.next_sequence {
            if sequence_id != expected {
                return Err(DecodeError::SequenceMismatch {
                    expected,
                    actual: sequence_id,
                });
            }
        }

        let len = payload_len(&self.header);
        self.frame_remaining = len;
        self.continued = len == MAX_PAYLOAD_LEN;
        self.last_sequence = Some(sequence_id);
        self.next_sequence = Some(sequence_id.wrapping_add(1));

        if self.first_frame {
            self.head = Some(PacketHead::new(sequence_id, len));
        }
        Ok(())
    }
}
