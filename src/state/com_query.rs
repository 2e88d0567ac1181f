//! `ComQuery`: relaying one client command packet to the backend.
//!
//! ```text
//!  frontend read ──> scan ──> relay_to(backend) ──> backend flush
//!        ▲                                              │
//!        └──────────── drive(frontend) <────────────────┘
//! ```
//!
//! Each frontend read buffer is handed to the backend whole, so a command
//! larger than any buffer (up to the protocol's 1 GiB) streams through in
//! buffer-sized pieces. The backend counts what it writes against the
//! frontend's relay length; once every byte is out, the frontend finalizes
//! and the session waits for the response.

use crate::connection::{Session, Side};
use crate::protocol::{capability, DecodeError, ResponseKind};
use crate::state::{transition, Context, Event, SessionError, State, StateHandler};
use tracing::debug;

pub struct FrontendComQuery;

impl StateHandler for FrontendComQuery {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let (frontend, backend) = session.split_mut();

        if frontend.direct_transfer_written() != 0 && frontend.is_direct_transfer_complete() {
            return finish_command(session, ctx);
        }
        if event == Event::Writable {
            frontend.disable_write();
            return Ok(());
        }

        if backend.has_pending_write() {
            frontend.disable_read();
            backend.enable_write();
            return Ok(());
        }
        if event == Event::Readable {
            frontend.read(ctx.pool)?;
        }
        if frontend.scanner().is_awaiting() {
            frontend.scan_read_buffer()?;
        }

        if frontend.relay_to(backend, ctx.pool)? == 0 {
            if frontend.scanner().is_awaiting() {
                frontend.enable_read();
            }
            return Ok(());
        }
        if frontend.scanner().is_awaiting() {
            frontend.enable_read();
        } else {
            frontend.disable_read();
        }
        session.drive(Side::Backend, ctx)
    }
}

/// The whole command is on the backend socket: switch both sides over to
/// the response.
fn finish_command(session: &mut Session, ctx: &mut Context<'_>) -> Result<(), SessionError> {
    let id = session.id();
    let (frontend, backend) = session.split_mut();

    let kind = frontend.pending_response;
    let last_sequence = frontend.scanner().last_sequence().unwrap_or(0);
    debug!(
        session = id,
        bytes = frontend.direct_transfer_len(),
        ?kind,
        "command relayed"
    );

    frontend.reset_direct_transfer();
    frontend.disable_read();
    backend.reset_direct_transfer();
    backend.disable_write_and_enable_read();

    match kind {
        ResponseKind::None => {
            frontend.pending_response = ResponseKind::None;
            transition(session, State::Idle);
            session.drive(Side::Frontend, ctx)
        }
        ResponseKind::Auth => {
            transition(session, State::Authenticating);
            session.frontend.enable_read();
            Ok(())
        }
        _ => {
            let deprecate_eof =
                frontend.capabilities & backend.capabilities & capability::CLIENT_DEPRECATE_EOF != 0;
            backend.tracker.reset(kind, deprecate_eof);
            backend
                .scanner_mut()
                .expect_packet(Some(last_sequence.wrapping_add(1)));
            transition(session, State::ComQueryResponse);
            Ok(())
        }
    }
}

pub struct BackendComQuery;

impl StateHandler for BackendComQuery {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let (frontend, backend) = session.split_mut();

        if event == Event::Readable {
            // Nothing is due from the server until the command is out; only
            // a disconnect is expected here
            if backend.read(ctx.pool)? == 0 {
                return Ok(());
            }
            return Err(DecodeError::UnexpectedPacket {
                header: backend.peek_packet_header().unwrap_or(0),
                phase: "relaying a command",
            }
            .into());
        }

        let before = backend.bytes_written();
        let drained = backend.flush_write_buffer(ctx.pool)?;
        let written = backend.bytes_written() - before;
        if written > 0 {
            ctx.stats.bytes_upstream(written);
            frontend.advance_direct_transfer(written)?;
        }

        if drained {
            session.drive(Side::Frontend, ctx)
        } else {
            frontend.disable_read();
            Ok(())
        }
    }
}
