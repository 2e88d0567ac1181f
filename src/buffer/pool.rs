//! Buffer Pool
//!
//! Recycles [`Buffer`]s so that steady-state relaying does not allocate.
//! A session that relays a large packet ping-pongs between two buffers:
//! the frontend reads into one while the backend drains the other, and
//! each drained buffer goes back here to be handed out for the next read.

use super::Buffer;
use tracing::trace;

/// Default capacity for connection read buffers (16 MiB, one full MySQL frame).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default number of idle buffers kept on the free list.
pub const DEFAULT_MAX_POOLED: usize = 64;

/// Allocation counters for a [`BufferPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created because the free list had nothing suitable
    pub created: u64,
    /// Allocations served from the free list
    pub reused: u64,
    /// Buffers handed back through `release`
    pub released: u64,
    /// Buffers currently owned by connections
    pub outstanding: u64,
}

/// A free list of fixed-capacity buffers.
///
/// Not thread-safe; each reactor owns one.
#[derive(Debug)]
pub struct BufferPool {
    /// Capacity used when a connection needs a read buffer
    buffer_size: usize,
    /// Maximum number of idle buffers retained
    max_pooled: usize,
    free: Vec<Buffer>,
    stats: PoolStats,
}

impl BufferPool {
    /// Creates a pool handing out `buffer_size` buffers by default.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffer_size,
            max_pooled,
            free: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    /// The default buffer capacity for this pool.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns a cleared buffer with capacity of at least `min_size`.
    pub fn allocate(&mut self, min_size: usize) -> Buffer {
        self.stats.outstanding += 1;

        if let Some(idx) = self.free.iter().rposition(|b| b.capacity() >= min_size) {
            self.stats.reused += 1;
            return self.free.swap_remove(idx);
        }

        self.stats.created += 1;
        let capacity = min_size.max(self.buffer_size);
        trace!(capacity, "allocating new buffer");
        Buffer::with_capacity(capacity)
    }

    /// Returns a buffer to the free list.
    ///
    /// The buffer is consumed, so it cannot be used or released again.
    /// When the free list is full the buffer is simply dropped.
    pub fn release(&mut self, mut buffer: Buffer) {
        debug_assert!(self.stats.outstanding > 0, "release without allocate");
        self.stats.outstanding = self.stats.outstanding.saturating_sub(1);
        self.stats.released += 1;

        if self.free.len() < self.max_pooled {
            buffer.clear();
            self.free.push(buffer);
        }
    }

    /// Number of idle buffers on the free list.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Current allocation counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED)
    }
}
