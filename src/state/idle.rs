//! `Idle`: between commands.
//!
//! The frontend waits for the next command packet. As soon as its first
//! payload byte is known the command is classified and the session moves
//! to `ComQuery`, even if most of the packet is still on the wire.
//!
//! The backend keeps read interest only to notice the server going away;
//! a server has nothing to say between commands.

use crate::connection::{Session, Side};
use crate::protocol::{Command, ComInitDb, DecodeError, ErrPacket, ResponseKind};
use crate::state::{transition, Context, Event, SessionError, State, StateHandler};
use tracing::{debug, warn};

pub struct FrontendIdle;

impl StateHandler for FrontendIdle {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let frontend = &mut session.frontend;

        if event == Event::Readable {
            frontend.read(ctx.pool)?;
        } else {
            if !frontend.flush_write_buffer(ctx.pool)? {
                return Ok(());
            }
            frontend.enable_read();
            if !frontend.has_unscanned_input() {
                return Ok(());
            }
        }

        dispatch_command(session, ctx)
    }
}

/// Classifies the command at the front of the frontend read buffer and
/// hands the session to `ComQuery`.
fn dispatch_command(session: &mut Session, ctx: &mut Context<'_>) -> Result<(), SessionError> {
    let id = session.id();
    let frontend = &mut session.frontend;

    if !frontend.scanner().is_awaiting() {
        frontend.reset_direct_transfer();
        frontend.scanner_mut().expect_packet(Some(0));
    }
    frontend.scan_read_buffer()?;

    let Some(head) = frontend.scanner().head().copied() else {
        return Ok(());
    };
    let Some(code) = head.first_byte() else {
        return Err(DecodeError::Malformed {
            packet: "command",
            reason: "empty command packet",
        }
        .into());
    };
    let command = Command::from_code(code);

    let kind = match (command, ResponseKind::of(command)) {
        (Command::Quit, _) => {
            debug!(session = id, "client quit");
            frontend.discard_scanned(ctx.pool);
            session.close();
            return Ok(());
        }
        (_, None) => {
            warn!(
                session = id,
                error = %SessionError::UnsupportedCommand(code),
                "rejecting command"
            );
            frontend.set_read_buffer(None, ctx.pool);
            let err = ErrPacket::new(
                head.sequence_id.wrapping_add(1),
                ErrPacket::UNKNOWN_COMMAND,
                format!("{} is not supported through this proxy", command),
            );
            frontend.write_packet(&err, ctx.pool)?;
            session.close();
            return session.drive(Side::Frontend, ctx);
        }
        (Command::InitDb, Some(kind)) => {
            if frontend.scanner().is_awaiting() {
                return Ok(());
            }
            if let Some(init) = frontend.peek_packet::<ComInitDb>()? {
                frontend.pending_schema = Some(init.schema);
            }
            kind
        }
        (_, Some(kind)) => kind,
    };

    debug!(session = id, command = %command, "relaying command");
    ctx.stats.command_relayed();
    frontend.pending_response = kind;
    transition(session, State::ComQuery);
    session.drive(Side::Frontend, ctx)
}

pub struct BackendIdle;

impl StateHandler for BackendIdle {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let backend = &mut session.backend;
        if event != Event::Readable {
            backend.flush_write_buffer(ctx.pool)?;
            return Ok(());
        }

        if backend.read(ctx.pool)? == 0 {
            return Ok(());
        }
        Err(DecodeError::UnexpectedPacket {
            header: backend.peek_packet_header().unwrap_or(0),
            phase: "no command was pending",
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::fixtures::*;
    use crate::state::testing::Harness;
    use crate::state::{SessionError, State};

    #[test]
    fn test_quit_closes_without_forwarding() {
        let mut h = Harness::new();
        h.establish(None);

        h.client.push_inbound(&framed(0, b"\x01"));
        h.pump().unwrap();

        assert!(h.finished);
        assert!(h.server.written().is_empty());
        assert_eq!(h.pool.stats().outstanding, 0);
    }

    #[test]
    fn test_client_disconnect_tears_down() {
        let mut h = Harness::new();
        h.establish(None);

        h.client.close_inbound();
        let err = h.pump().unwrap_err();
        assert!(err.is_disconnect());
        h.teardown();
        assert_eq!(h.pool.stats().outstanding, 0);
    }

    #[test]
    fn test_replication_is_refused() {
        let mut h = Harness::new();
        h.establish(None);

        h.client.push_inbound(&framed(0, b"\x12\x04\x00\x00\x00\x00\x00\x01\x00\x00\x00"));
        h.pump().unwrap();

        let reply = h.client.written();
        assert_eq!(reply[3], 1, "reply continues the command's sequence");
        assert_eq!(reply[4], 0xFF);
        assert!(h.server.written().is_empty());
        assert!(h.finished);
    }

    #[test]
    fn test_unsolicited_backend_data_is_a_violation() {
        let mut h = Harness::new();
        h.establish(None);

        h.server.push_inbound(&framed(0, &ok_payload(0)));
        assert!(matches!(h.pump(), Err(SessionError::Protocol(_))));

        h.teardown();
        assert_eq!(h.session.frontend.state(), State::Closing);
        assert_eq!(h.session.backend.state(), State::Closing);
        assert_eq!(h.pool.stats().outstanding, 0);
    }

    #[test]
    fn test_backend_close_while_idle() {
        let mut h = Harness::new();
        h.establish(None);

        h.server.close_inbound();
        assert!(h.pump().unwrap_err().is_disconnect());
    }

    #[test]
    fn test_command_byte_known_before_packet_completes() {
        let mut h = Harness::new();
        h.establish(None);

        let query = framed(0, &[b"\x03".as_slice(), &[b'x'; 1000]].concat());
        h.client.push_inbound(&query[..40]);
        h.pump().unwrap();

        assert_eq!(h.session.frontend.state(), State::ComQuery);
        assert_eq!(h.server.written(), &query[..40]);
    }
}
