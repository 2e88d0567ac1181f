//! MySQL Client/Server Protocol
//!
//! Just enough of the MySQL wire protocol to proxy it.
//!
//! ## Overview
//!
//! The proxy never re-serializes traffic. Bytes are relayed exactly as they
//! arrive; the protocol layer only answers three questions:
//!
//! 1. Where does the current logical packet end? ([`PacketScanner`])
//! 2. Where does the current server response end? ([`ResponseTracker`])
//! 3. What do the handshake packets say? ([`HandshakeV10`], [`HandshakeResponse41`])
//!
//! ## Modules
//!
//! - `packet`: frame layout and the incremental scanner
//! - `codec`: `Decode`/`Encode` traits, error types and field readers
//! - `types`: the packets the proxy decodes, capability and command codes
//! - `response`: response boundary tracking
//!
//! ## Example
//!
//! ```ignore
//! use mysql_relay::protocol::{decode, HandshakeV10};
//!
//! match decode::<HandshakeV10>(buffer.chunk())? {
//!     Some((greeting, consumed)) => println!("server {}", greeting.server_version),
//!     None => { /* wait for more bytes */ }
//! }
//! ```

pub mod codec;
pub mod packet;
pub mod response;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use codec::{decode, encode, Decode, DecodeError, Encode, EncodeError};
pub use packet::{PacketHead, PacketScanner, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use response::{Outcome, Progress, ResponseKind, ResponseTracker};
pub use types::{capability, header, Command, ComInitDb, ErrPacket, HandshakeResponse41, HandshakeV10};
