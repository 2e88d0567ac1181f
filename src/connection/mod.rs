//! Connection Module
//!
//! Everything that wraps a socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Session                            │
//! │                                                             │
//! │  ┌────────────────────────┐      ┌────────────────────────┐ │
//! │  │   FrontendConnection   │      │   BackendConnection    │ │
//! │  │  schema, capabilities  │      │  greeting, tracker     │ │
//! │  │ ┌────────────────────┐ │      │ ┌────────────────────┐ │ │
//! │  │ │     Connection     │ │      │ │     Connection     │ │ │
//! │  │ │ socket   interest  │ │ ───> │ │ socket   interest  │ │ │
//! │  │ │ buffers  state     │ │ <─── │ │ buffers  state     │ │ │
//! │  │ │ relay counters     │ │      │ │ relay counters     │ │ │
//! │  │ └────────────────────┘ │      │ └────────────────────┘ │ │
//! │  └────────────────────────┘      └────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲ client socket                    ▲ database socket
//! ```
//!
//! ## Features
//!
//! - **Non-blocking**: connections only attempt I/O; the reactor waits
//! - **Buffer handoff**: relayed bytes move between connections by moving
//!   the buffer, not by copying it
//! - **Explicit interest**: handlers say what they want next through
//!   `enable_*`/`disable_*`

pub mod conn;
pub mod interest;
pub mod session;
pub mod socket;

pub use conn::Connection;
pub use interest::Interest;
pub use session::{BackendConnection, FrontendConnection, Session, SessionId, Side};
pub use socket::Socket;
