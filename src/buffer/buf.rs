//! Fixed-capacity socket buffer.
//!
//! A `Buffer` is a contiguous byte region with two cursors:
//!
//! ```text
//!  0          read_pos            write_pos          capacity
//!  ├──consumed──┼──────readable──────┼──────spare────────┤
//! ```
//!
//! Bytes arrive at `write_pos` (from a socket or an encoder) and leave from
//! `read_pos` (to a socket or a decoder). The capacity never changes; when
//! the spare region runs out the readable bytes are moved back to the front.

use crate::connection::Socket;
use bytes::Buf;
use std::fmt;
use std::io;

/// A reusable byte buffer with a fixed capacity.
///
/// Buffers are created by [`BufferPool`](super::BufferPool) and handed back
/// to it when a connection is done with them.
pub struct Buffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    /// Creates a zeroed buffer. Use [`BufferPool::allocate`](super::BufferPool::allocate)
    /// outside of the pool itself.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total size of the underlying region.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes that can be appended before the buffer is full,
    /// counting the consumed prefix that [`compact`](Self::compact) would reclaim.
    pub fn writable(&self) -> usize {
        self.capacity() - self.remaining()
    }

    /// Returns true if no unread bytes are held.
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Discards all content.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Moves the unread bytes to the start of the region.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Mutable view of the unread bytes.
    ///
    /// Only used for the few in-place header edits the proxy performs.
    pub fn chunk_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.read_pos..self.write_pos]
    }

    /// Appends `src`, compacting first if the tail is too short.
    ///
    /// Returns `false` (and appends nothing) if the bytes do not fit.
    pub fn put_slice(&mut self, src: &[u8]) -> bool {
        if src.len() > self.writable() {
            return false;
        }
        if self.capacity() - self.write_pos < src.len() {
            self.compact();
        }
        self.data[self.write_pos..self.write_pos + src.len()].copy_from_slice(src);
        self.write_pos += src.len();
        true
    }

    /// Drops unread bytes past `len`, keeping the first `len` of them.
    pub fn truncate(&mut self, len: usize) {
        if len < self.remaining() {
            self.write_pos = self.read_pos + len;
        }
    }

    /// Reads once from `socket` into the spare region.
    ///
    /// Returns `Ok(0)` when the socket has nothing to offer right now,
    /// `Err(UnexpectedEof)` when the peer closed the stream, and an error of
    /// kind `OutOfMemory` when the buffer has no room left.
    pub fn transfer_from(&mut self, socket: &dyn Socket) -> io::Result<usize> {
        if self.write_pos == self.capacity() {
            self.compact();
        }
        if self.write_pos == self.capacity() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "read buffer is full",
            ));
        }

        match socket.try_read(&mut self.data[self.write_pos..]) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => {
                self.write_pos += n;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Writes as many unread bytes to `socket` as it accepts without blocking.
    ///
    /// Returns the number of bytes written; `Ok(0)` means the socket is full.
    pub fn transfer_to(&mut self, socket: &dyn Socket) -> io::Result<usize> {
        let mut total = 0;

        while self.has_remaining() {
            match socket.try_write(self.chunk()) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => {
                    self.advance(n);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.is_empty() {
            self.clear();
        }
        Ok(total)
    }
}

impl Buf for Buffer {
    fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past the readable region: {} > {}",
            cnt,
            self.remaining()
        );
        self.read_pos += cnt;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::socket::mock::MockSocket;

    #[test]
    fn test_put_and_consume() {
        let mut buf = Buffer::with_capacity(8);
        assert!(buf.put_slice(b"abcde"));
        assert_eq!(buf.remaining(), 5);
        assert_eq!(buf.chunk(), b"abcde");

        buf.advance(2);
        assert_eq!(buf.chunk(), b"cde");
        assert_eq!(buf.writable(), 5);
    }

    #[test]
    fn test_put_compacts_when_tail_is_short() {
        let mut buf = Buffer::with_capacity(8);
        assert!(buf.put_slice(b"abcdef"));
        buf.advance(4);

        // Only 2 bytes of tail left, but 6 writable after compaction
        assert!(buf.put_slice(b"wxyz"));
        assert_eq!(buf.chunk(), b"efwxyz");
    }

    #[test]
    fn test_put_rejects_overflow() {
        let mut buf = Buffer::with_capacity(4);
        assert!(!buf.put_slice(b"too long"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let mut buf = Buffer::with_capacity(16);
        buf.put_slice(b"headtail");
        buf.advance(1);
        buf.truncate(3);
        assert_eq!(buf.chunk(), b"ead");
    }

    #[test]
    fn test_transfer_from_reads_one_chunk() {
        let socket = MockSocket::new();
        socket.push_inbound(b"hello");
        socket.push_inbound(b"world");

        let mut buf = Buffer::with_capacity(64);
        assert_eq!(buf.transfer_from(&socket).unwrap(), 5);
        assert_eq!(buf.chunk(), b"hello");

        assert_eq!(buf.transfer_from(&socket).unwrap(), 5);
        assert_eq!(buf.chunk(), b"helloworld");

        // Nothing left: would block, not an error
        assert_eq!(buf.transfer_from(&socket).unwrap(), 0);
    }

    #[test]
    fn test_transfer_from_eof() {
        let socket = MockSocket::new();
        socket.close_inbound();

        let mut buf = Buffer::with_capacity(64);
        let err = buf.transfer_from(&socket).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_transfer_from_full_buffer() {
        let socket = MockSocket::new();
        socket.push_inbound(b"more");

        let mut buf = Buffer::with_capacity(4);
        buf.put_slice(b"full");
        let err = buf.transfer_from(&socket).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_transfer_to_partial_write() {
        let socket = MockSocket::new();
        socket.set_write_capacity(3);

        let mut buf = Buffer::with_capacity(16);
        buf.put_slice(b"abcdefgh");

        assert_eq!(buf.transfer_to(&socket).unwrap(), 3);
        assert_eq!(buf.remaining(), 5);
        assert_eq!(socket.written(), b"abc");

        socket.set_write_capacity(usize::MAX);
        assert_eq!(buf.transfer_to(&socket).unwrap(), 5);
        assert!(buf.is_empty());
        assert_eq!(socket.written(), b"abcdefgh");
    }
}
