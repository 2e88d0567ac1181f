//! Reactor
//!
//! A reactor is the event loop that owns a set of sessions. It waits for
//! socket readiness and hands each ready socket to the handler of its
//! connection's current state. It knows nothing about MySQL.
//!
//! ## One Turn
//!
//! ```text
//!            ┌──────────────── poll_fn ────────────────┐
//!            │ commands       (register, close, stop)  │
//!            │ backend connects in flight              │
//!  wakeup ──>│ poll_write_ready / poll_read_ready      │──> Turn
//!            │   for every connection, per interest    │
//!            │ idle sweep tick                         │
//!            └─────────────────────────────────────────┘
//!
//!  Turn ──> commands ──> new sessions ──> dispatch events ──> sweep
//!                                            │
//!                                            ├── Err ──────> teardown
//!                                            └── finished ─> teardown
//! ```
//!
//! ## Threads
//!
//! Every reactor runs on its own thread with a current-thread tokio
//! runtime, so sessions, buffers and handlers are never shared. Other
//! threads talk to it through a [`ReactorHandle`]. Both sides of a session
//! live on the same reactor, which is what lets one handler drive the
//! other side synchronously.

pub mod connector;
pub mod core;
pub mod handle;

pub use self::core::{Reactor, ReactorThread};
pub use connector::{BackendConnector, ConnectFuture, TcpConnector};
pub use handle::{Command, ReactorClosed, ReactorHandle};
