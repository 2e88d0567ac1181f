//! Protocol State Machine
//!
//! Every connection is always in exactly one [`State`]. The state picks a
//! [`StateHandler`] for each side, and the handler does the work: it reads,
//! relays, flips interest flags and chooses the next state.
//!
//! ## States
//!
//! ```text
//!   Connecting ──greeting──> Authenticating ──OK──> Idle <─────────────┐
//!                                 ▲                  │ command         │
//!                                 │ COM_CHANGE_USER  ▼                 │
//!                                 └──────────────  ComQuery            │
//!                                                    │ relayed         │
//!                                                    ▼                 │
//!                                             ComQueryResponse ──done──┘
//!
//!   any state ──error / quit / ERR──> Closing ──flushed──> torn down
//! ```
//!
//! ## Handlers
//!
//! Handlers are zero-sized values, one per state and side, looked up by
//! [`State::handler`]. They carry no data, so one instance serves every
//! session. A handler receives the whole [`Session`] and may drive the
//! peer side synchronously through [`Session::drive`]; both sides of a
//! session live on the same reactor thread, so this never crosses threads.
//!
//! ## Errors
//!
//! Would-block and partial packets are not errors: the handler re-arms
//! interest and returns `Ok`. Everything else is a [`SessionError`], and
//! the reactor tears the whole session down.

pub mod authenticating;
pub mod closing;
pub mod com_query;
pub mod com_query_response;
pub mod connecting;
pub mod idle;

use crate::buffer::BufferPool;
use crate::connection::{Session, Side};
use crate::protocol::{DecodeError, EncodeError};
use crate::stats::ProxyStats;
use std::io;
use thiserror::Error;

/// Protocol phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Waiting for the server greeting
    Connecting,
    /// Relaying the authentication exchange
    Authenticating,
    /// Waiting for the next client command
    Idle,
    /// Relaying a client command to the backend
    ComQuery,
    /// Relaying the backend's response to the client
    ComQueryResponse,
    /// Terminal; the session is being torn down
    Closing,
}

impl State {
    /// The handler for `side` in this state.
    pub fn handler(self, side: Side) -> &'static dyn StateHandler {
        match (self, side) {
            (State::Connecting, Side::Frontend) => &connecting::FrontendConnecting,
            (State::Connecting, Side::Backend) => &connecting::BackendConnecting,
            (State::Authenticating, Side::Frontend) => &authenticating::FrontendAuthenticating,
            (State::Authenticating, Side::Backend) => &authenticating::BackendAuthenticating,
            (State::Idle, Side::Frontend) => &idle::FrontendIdle,
            (State::Idle, Side::Backend) => &idle::BackendIdle,
            (State::ComQuery, Side::Frontend) => &com_query::FrontendComQuery,
            (State::ComQuery, Side::Backend) => &com_query::BackendComQuery,
            (State::ComQueryResponse, Side::Frontend) => {
                &com_query_response::FrontendComQueryResponse
            }
            (State::ComQueryResponse, Side::Backend) => {
                &com_query_response::BackendComQueryResponse
            }
            (State::Closing, Side::Frontend) => &closing::FrontendClosing,
            (State::Closing, Side::Backend) => &closing::BackendClosing,
        }
    }
}

/// Why a handler was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The socket is readable
    Readable,
    /// The socket is writable
    Writable,
    /// The peer connection asked this side to make progress
    Drive,
}

/// Per-reactor resources handed to every handler call.
pub struct Context<'a> {
    pub pool: &'a mut BufferPool,
    pub stats: &'a ProxyStats,
}

/// The logic for one state on one side of a session.
pub trait StateHandler: Sync {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError>;
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket failure, including the peer closing the stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A read buffer filled up without containing a relayable packet
    #[error("read buffer full")]
    BufferFull,

    /// More bytes were relayed than the packet spans
    #[error("relay overrun: wrote {written} bytes of a {len}-byte packet")]
    RelayOverrun { len: u64, written: u64 },

    /// A buffer was handed to a connection still flushing another one
    #[error("peer write buffer still holds unflushed bytes")]
    WriteBufferBusy,

    #[error("unsupported command 0x{0:02x}")]
    UnsupportedCommand(u8),
}

impl SessionError {
    /// True for an ordinary disconnect by either peer.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// True for relay bookkeeping failures, which point at a proxy bug
    /// rather than a misbehaving peer.
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            SessionError::RelayOverrun { .. } | SessionError::WriteBufferBusy
        )
    }
}

/// Moves the frontend and backend into `state` together.
pub(crate) fn transition(session: &mut Session, state: State) {
    session.frontend.set_state(state);
    session.backend.set_state(state);
}

#[cfg(test)]
pub(crate) mod testing;
