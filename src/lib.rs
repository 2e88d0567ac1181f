//! # mysql-relay - A Non-Blocking MySQL Wire-Protocol Proxy
//!
//! mysql-relay sits between MySQL clients and a MySQL server and relays the
//! native binary protocol in both directions. Packets are framed and
//! inspected just enough to follow the conversation; their bytes are moved,
//! not rewritten.
//!
//! ## Features
//!
//! - **Reactor per core**: every session lives on one event-loop thread,
//!   so handlers never lock anything
//! - **Buffer handoff**: a buffer read from one socket becomes the other
//!   socket's write buffer without copying
//! - **Large packets**: commands and results of any size stream through
//!   in buffer-sized pieces, including multi-frame packets over 16 MiB
//! - **Back-pressure**: a side stops reading while its peer still has
//!   unflushed bytes
//! - **Session tracking**: current schema, idle timeout, forced close
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              mysql-relay                                │
//! │                                                                         │
//! │  ┌─────────────┐  round-robin   ┌──────────────────────────────────┐    │
//! │  │ ProxyServer │───────────────>│ Reactor thread (x N)             │    │
//! │  │ (accept)    │                │  ┌────────────────────────────┐  │    │
//! │  └─────────────┘                │  │ Session                    │  │    │
//! │                                 │  │  Frontend ──── Backend     │  │    │
//! │                                 │  │  Connection    Connection  │  │    │
//! │                                 │  └─────────────┬──────────────┘  │    │
//! │                                 │                │ State           │    │
//! │                                 │                ▼                 │    │
//! │                                 │  ┌────────────────────────────┐  │    │
//! │                                 │  │ StateHandler (per side)    │  │    │
//! │                                 │  │ PacketScanner / Tracker    │  │    │
//! │                                 │  └────────────────────────────┘  │    │
//! │                                 │  BufferPool (per reactor)        │    │
//! │                                 └──────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use mysql_relay::{ProxyConfig, ProxyServer};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = ProxyConfig::default();
//!     let listener = TcpListener::bind(config.listen).await?;
//!
//!     let server = ProxyServer::new(config);
//!     server
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`buffer`]: Reusable byte buffers and the per-reactor pool
//! - [`connection`]: Connections, interest flags and sessions
//! - [`protocol`]: Packet framing, codec and response tracking
//! - [`state`]: The protocol state machine and its handlers
//! - [`reactor`]: Event loops, backend connects and the command channel
//! - [`server`]: The accept loop
//!
//! ## Design Highlights
//!
//! ### Single-Threaded Sessions
//!
//! A session's two connections, their buffers and the pool they come from
//! all belong to one reactor thread. A handler may therefore drive the
//! peer connection directly, inside the same call.
//!
//! ### Ownership Instead of Aliasing
//!
//! A buffer has exactly one owner. Relaying moves it, and releasing it to
//! the pool consumes it.
//!
//! ### Failure Is Teardown
//!
//! Handlers return `Result`. Would-block and partial packets are `Ok`;
//! every error closes both sides of the session and returns their buffers.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod state;
pub mod stats;

// Re-export commonly used types for convenience
pub use buffer::{Buffer, BufferPool};
pub use config::ProxyConfig;
pub use connection::{Connection, Session, SessionId, Side};
pub use reactor::{BackendConnector, Reactor, ReactorHandle, TcpConnector};
pub use server::ProxyServer;
pub use state::{SessionError, State};
pub use stats::{ProxyStats, StatsSnapshot};

/// The default port mysql-relay listens on
pub const DEFAULT_PORT: u16 = 3307;

/// Version of mysql-relay
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
