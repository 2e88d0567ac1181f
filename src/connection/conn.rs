//! The per-socket connection core.
//!
//! A [`Connection`] owns one non-blocking socket, the buffers attached to
//! it, the interest flags the reactor watches, the current protocol state
//! and the relay counters. Frontend and backend connections wrap the same
//! core.
//!
//! ## Buffer Ownership
//!
//! ```text
//!   frontend                         backend
//!  ┌──────────┐   relay_to()       ┌───────────┐
//!  │ read_buf │ ─────────────────> │ write_buf │ ──> socket
//!  └──────────┘  (moved, no copy)  └───────────┘
//!       ▲                                │ drained
//!       └──── pool.allocate() <── pool <─┘ release()
//! ```
//!
//! A buffer is owned by exactly one slot at a time. Replacing a slot
//! releases whatever it held, and a drained write buffer goes straight back
//! to the pool.

use crate::buffer::{Buffer, BufferPool};
use crate::connection::{Interest, Side, Socket};
use crate::protocol::{decode, encode, Decode, Encode, PacketHead, PacketScanner};
use crate::state::{SessionError, State};
use bytes::Buf;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// One side of a proxied session.
pub struct Connection {
    side: Side,
    socket: Box<dyn Socket>,
    peer_addr: Option<SocketAddr>,
    state: State,
    interest: Interest,
    read_buf: Option<Buffer>,
    write_buf: Option<Buffer>,
    scanner: PacketScanner,
    /// Offset into the unread bytes of `read_buf` up to which framing has
    /// been scanned (or a packet decoded)
    packet_scan_pos: usize,
    /// Bytes the in-flight relayed packet is known to span
    direct_transfer_len: u64,
    /// Bytes of the in-flight relayed packet written to the peer so far
    direct_transfer_written: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl Connection {
    pub fn new(side: Side, socket: Box<dyn Socket>) -> Self {
        let peer_addr = socket.peer_addr().ok();
        Self {
            side,
            socket,
            peer_addr,
            state: State::Connecting,
            interest: Interest::Neither,
            read_buf: None,
            write_buf: None,
            scanner: PacketScanner::new(),
            packet_scan_pos: 0,
            direct_transfer_len: 0,
            direct_transfer_written: 0,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn socket(&self) -> &dyn Socket {
        &*self.socket
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!(side = %self.side, from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
    }

    // ========================================================================
    // Interest
    // ========================================================================

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn enable_read(&mut self) {
        self.interest = self.interest.enable_read();
    }

    pub fn disable_read(&mut self) {
        self.interest = self.interest.disable_read();
    }

    pub fn enable_write(&mut self) {
        self.interest = self.interest.enable_write();
    }

    pub fn disable_write(&mut self) {
        self.interest = self.interest.disable_write();
    }

    pub fn disable_read_and_enable_write(&mut self) {
        self.interest = self.interest.disable_read().enable_write();
    }

    pub fn disable_write_and_enable_read(&mut self) {
        self.interest = self.interest.disable_write().enable_read();
    }

    // ========================================================================
    // Buffers and I/O
    // ========================================================================

    /// Reads whatever the socket has into the read buffer, allocating one
    /// from `pool` if needed.
    ///
    /// Returns the number of bytes read; `0` means the socket had nothing.
    /// End of stream is an `UnexpectedEof` I/O error.
    pub fn read(&mut self, pool: &mut BufferPool) -> Result<usize, SessionError> {
        let buf = self
            .read_buf
            .get_or_insert_with(|| pool.allocate(pool.buffer_size()));

        let n = match buf.transfer_from(&*self.socket) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::OutOfMemory => {
                return Err(SessionError::BufferFull)
            }
            Err(e) => return Err(e.into()),
        };

        if n > 0 {
            self.bytes_read += n as u64;
            trace!(side = %self.side, bytes = n, "read");
        }
        Ok(n)
    }

    /// Writes as much of `buf` as the socket accepts without blocking.
    pub fn write(&mut self, buf: &mut Buffer) -> io::Result<usize> {
        let n = buf.transfer_to(&*self.socket)?;
        if n > 0 {
            self.bytes_written += n as u64;
            trace!(side = %self.side, bytes = n, "wrote");
        }
        Ok(n)
    }

    /// Tries to drain the write buffer.
    ///
    /// Returns `true` once nothing is left to write. Write interest is turned
    /// off when drained and on otherwise; a drained buffer goes back to `pool`.
    pub fn flush_write_buffer(&mut self, pool: &mut BufferPool) -> Result<bool, SessionError> {
        let Some(mut buf) = self.write_buf.take() else {
            self.disable_write();
            return Ok(true);
        };

        let result = self.write(&mut buf);
        if buf.is_empty() {
            pool.release(buf);
        } else {
            self.write_buf = Some(buf);
        }
        result?;

        if self.write_buf.is_some() {
            self.enable_write();
            Ok(false)
        } else {
            self.disable_write();
            Ok(true)
        }
    }

    /// Replaces the read buffer, releasing the previous one.
    pub fn set_read_buffer(&mut self, buf: Option<Buffer>, pool: &mut BufferPool) {
        if let Some(old) = std::mem::replace(&mut self.read_buf, buf) {
            pool.release(old);
        }
        self.packet_scan_pos = 0;
    }

    /// Replaces the write buffer, releasing the previous one.
    pub fn set_write_buffer(&mut self, buf: Option<Buffer>, pool: &mut BufferPool) {
        if let Some(old) = std::mem::replace(&mut self.write_buf, buf) {
            pool.release(old);
        }
    }

    pub fn read_buffer(&self) -> Option<&Buffer> {
        self.read_buf.as_ref()
    }

    pub fn read_buffer_mut(&mut self) -> Option<&mut Buffer> {
        self.read_buf.as_mut()
    }

    pub fn write_buffer(&self) -> Option<&Buffer> {
        self.write_buf.as_ref()
    }

    /// True if the write buffer holds bytes not yet on the wire.
    pub fn has_pending_write(&self) -> bool {
        self.write_buf.as_ref().is_some_and(|buf| !buf.is_empty())
    }

    /// Unread bytes held in the read buffer.
    pub fn buffered(&self) -> usize {
        self.read_buf.as_ref().map_or(0, |buf| buf.remaining())
    }

    /// True if bytes past the scan position are waiting in the read buffer.
    pub fn has_unscanned_input(&self) -> bool {
        self.buffered() > self.packet_scan_pos
    }

    /// Moves the scanned prefix of the read buffer to `peer` as its write
    /// buffer and enables the peer's write interest.
    ///
    /// Bytes past the scan position (the start of a pipelined packet) are
    /// copied into a fresh buffer that stays here as the read buffer.
    /// Fails with `WriteBufferBusy` if the peer has not drained its last
    /// write.
    pub fn relay_to(
        &mut self,
        peer: &mut Connection,
        pool: &mut BufferPool,
    ) -> Result<usize, SessionError> {
        let len = self.packet_scan_pos;
        if len == 0 {
            return Ok(0);
        }
        if peer.has_pending_write() {
            return Err(SessionError::WriteBufferBusy);
        }
        let Some(mut buf) = self.read_buf.take() else {
            return Ok(0);
        };

        if buf.remaining() > len {
            let mut tail = pool.allocate(buf.remaining() - len);
            tail.put_slice(&buf.chunk()[len..]);
            buf.truncate(len);
            self.read_buf = Some(tail);
        }
        self.packet_scan_pos = 0;

        trace!(from = %self.side, bytes = len, "relay");
        peer.set_write_buffer(Some(buf), pool);
        peer.enable_write();
        Ok(len)
    }

    /// Drops the scanned prefix of the read buffer without relaying it.
    pub fn discard_scanned(&mut self, pool: &mut BufferPool) {
        if let Some(buf) = self.read_buf.as_mut() {
            buf.advance(self.packet_scan_pos.min(buf.remaining()));
            if buf.is_empty() {
                self.set_read_buffer(None, pool);
            }
        }
        self.packet_scan_pos = 0;
    }

    /// Returns every buffer to the pool.
    pub fn release_buffers(&mut self, pool: &mut BufferPool) {
        self.set_read_buffer(None, pool);
        self.set_write_buffer(None, pool);
    }

    // ========================================================================
    // Packets
    // ========================================================================

    /// Decodes one `P` at the scan position without consuming it.
    ///
    /// On success the scan position moves past the packet, so it can still
    /// be relayed. `Ok(None)` means the packet is not complete yet.
    pub fn decode_packet<P: Decode>(&mut self) -> Result<Option<P>, SessionError> {
        let Some(buf) = self.read_buf.as_ref() else {
            return Ok(None);
        };
        match decode::<P>(&buf.chunk()[self.packet_scan_pos..])? {
            Some((packet, consumed)) => {
                self.packet_scan_pos += consumed;
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Decodes one `P` from the start of the read buffer, ignoring the scan
    /// position.
    pub fn peek_packet<P: Decode>(&self) -> Result<Option<P>, SessionError> {
        let Some(buf) = self.read_buf.as_ref() else {
            return Ok(None);
        };
        Ok(decode::<P>(buf.chunk())?.map(|(packet, _)| packet))
    }

    /// Reads from the socket, then [`decode_packet`](Self::decode_packet)s.
    pub fn read_packet<P: Decode>(
        &mut self,
        pool: &mut BufferPool,
    ) -> Result<Option<P>, SessionError> {
        self.read(pool)?;
        self.decode_packet()
    }

    /// Encodes `packet` into the write buffer and enables write interest.
    pub fn write_packet<P: Encode>(
        &mut self,
        packet: &P,
        pool: &mut BufferPool,
    ) -> Result<(), SessionError> {
        let buf = self
            .write_buf
            .get_or_insert_with(|| pool.allocate(pool.buffer_size()));
        encode(packet, buf)?;
        self.enable_write();
        Ok(())
    }

    pub fn scanner(&self) -> &PacketScanner {
        &self.scanner
    }

    pub fn scanner_mut(&mut self) -> &mut PacketScanner {
        &mut self.scanner
    }

    /// Runs the packet scanner over the unscanned part of the read buffer.
    ///
    /// Returns the head of the packet if it completed. The relay length
    /// follows the scanner's expected size.
    pub fn scan_read_buffer(&mut self) -> Result<Option<PacketHead>, SessionError> {
        let Some(buf) = self.read_buf.as_ref() else {
            return Ok(None);
        };
        let (consumed, head) = self.scanner.scan(&buf.chunk()[self.packet_scan_pos..])?;
        self.packet_scan_pos += consumed;
        self.direct_transfer_len = self.direct_transfer_len.max(self.scanner.expected());
        Ok(head)
    }

    /// Like [`scan_read_buffer`](Self::scan_read_buffer), arming the scanner
    /// for a new packet first if the previous one is finished.
    pub fn scan_packet(&mut self, sequence_id: Option<u8>) -> Result<Option<PacketHead>, SessionError> {
        if !self.scanner.is_awaiting() {
            self.scanner.expect_packet(sequence_id);
        }
        self.scan_read_buffer()
    }

    /// The first byte of the unscanned input, if any.
    pub fn peek_unscanned(&self) -> Option<u8> {
        self.read_buf
            .as_ref()
            .and_then(|buf| buf.chunk().get(self.packet_scan_pos).copied())
    }

    /// The first payload byte of the packet at the scan position, if its
    /// frame header and that byte have arrived.
    pub fn peek_packet_header(&self) -> Option<u8> {
        self.read_buf.as_ref().and_then(|buf| {
            buf.chunk()
                .get(self.packet_scan_pos + crate::protocol::HEADER_LEN)
                .copied()
        })
    }

    // ========================================================================
    // Relay counters
    // ========================================================================

    pub fn direct_transfer_len(&self) -> u64 {
        self.direct_transfer_len
    }

    pub fn direct_transfer_written(&self) -> u64 {
        self.direct_transfer_written
    }

    /// Records `n` more relayed bytes.
    pub fn advance_direct_transfer(&mut self, n: u64) -> Result<(), SessionError> {
        self.direct_transfer_written += n;
        if self.direct_transfer_written > self.direct_transfer_len {
            return Err(SessionError::RelayOverrun {
                len: self.direct_transfer_len,
                written: self.direct_transfer_written,
            });
        }
        Ok(())
    }

    /// True once every byte of a non-empty relayed packet has been written.
    pub fn is_direct_transfer_complete(&self) -> bool {
        self.direct_transfer_len > 0 && self.direct_transfer_written >= self.direct_transfer_len
    }

    /// Clears the relay counters and the scanner.
    pub fn reset_direct_transfer(&mut self) {
        self.direct_transfer_len = 0;
        self.direct_transfer_written = 0;
        self.scanner.reset();
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("interest", &self.interest)
            .field("read_buf", &self.read_buf)
            .field("write_buf", &self.write_buf)
            .field("direct_transfer_len", &self.direct_transfer_len)
            .field("direct_transfer_written", &self.direct_transfer_written)
            .finish()
    }
}
