//! Buffer Module
//!
//! Fixed-capacity byte buffers and the per-reactor pool that recycles them.
//!
//! ## Ownership
//!
//! ```text
//!   BufferPool ──allocate()──> Buffer ──owned by──> Connection
//!        ▲                                              │
//!        │                                              │ relay_to(peer)
//!        │                                              ▼
//!        └──────────release(buffer)──────────── peer Connection
//! ```
//!
//! A [`Buffer`] is never shared. Handing the bytes read from one socket to
//! the other side of a session moves the buffer; the receiving connection
//! releases whatever buffer it held before. [`BufferPool::release`] takes
//! the buffer by value, so a released buffer cannot be read, written or
//! released a second time.
//!
//! The pool is not synchronized. Every reactor thread owns its own pool.

pub mod buf;
pub mod pool;

pub use buf::Buffer;
pub use pool::{BufferPool, PoolStats, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED};
