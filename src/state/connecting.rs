//! `Connecting`: the backend socket is up and the server greeting is due.
//!
//! The greeting is relayed to the client with the TLS and compression
//! capability bits cleared, since neither stream could be scanned.

use crate::connection::{Session, Side};
use crate::protocol::{capability, header, DecodeError, ErrPacket, HandshakeV10};
use crate::state::{transition, Context, Event, SessionError, State, StateHandler};
use tracing::{debug, warn};

/// The client must not speak before the server.
pub struct FrontendConnecting;

impl StateHandler for FrontendConnecting {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        match event {
            Event::Readable => {
                session.frontend.read(ctx.pool)?;
                Err(DecodeError::UnexpectedPacket {
                    header: session.frontend.peek_unscanned().unwrap_or(0),
                    phase: "waiting for the server greeting",
                }
                .into())
            }
            Event::Writable | Event::Drive => {
                session.frontend.flush_write_buffer(ctx.pool)?;
                Ok(())
            }
        }
    }
}

pub struct BackendConnecting;

impl StateHandler for BackendConnecting {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        if event == Event::Writable {
            session.backend.disable_write();
            return Ok(());
        }

        let id = session.id();
        let (frontend, backend) = session.split_mut();
        backend.read(ctx.pool)?;

        // A server refusing the connection (too many connections, host
        // blocked) answers with ERR instead of a greeting
        if backend.peek_packet_header() == Some(header::ERR) {
            let Some(err) = backend.decode_packet::<ErrPacket>()? else {
                return Ok(());
            };
            warn!(session = id, code = err.code, message = %err.message, "backend refused connection");
            backend.relay_to(frontend, ctx.pool)?;
            session.close();
            return session.drive(Side::Frontend, ctx);
        }

        let Some(mut greeting) = backend.decode_packet::<HandshakeV10>()? else {
            return Ok(());
        };
        if backend.has_unscanned_input() {
            return Err(DecodeError::UnexpectedPacket {
                header: backend.peek_unscanned().unwrap_or(0),
                phase: "relaying the server greeting",
            }
            .into());
        }

        if let Some(buf) = backend.read_buffer_mut() {
            greeting.strip_capabilities(buf.chunk_mut(), capability::STRIPPED);
        }
        debug!(
            session = id,
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "backend greeting"
        );
        backend.server_version = Some(greeting.server_version);
        backend.connection_id = greeting.connection_id;
        backend.capabilities = greeting.capabilities;

        backend.relay_to(frontend, ctx.pool)?;
        backend.disable_read();
        transition(session, State::Authenticating);
        session.drive(Side::Frontend, ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::Side;
    use crate::protocol::fixtures::*;
    use crate::protocol::{capability, decode, HandshakeV10};
    use crate::state::testing::Harness;
    use crate::state::{SessionError, State};

    #[test]
    fn test_greeting_is_relayed_without_tls() {
        let mut h = Harness::new();
        let greeting = framed(0, &greeting_payload());
        h.server.push_inbound(&greeting);
        h.pump().unwrap();

        let relayed = h.client.take_written();
        assert_eq!(relayed.len(), greeting.len());
        let (parsed, _) = decode::<HandshakeV10>(&relayed).unwrap().unwrap();
        assert_eq!(parsed.capabilities & capability::STRIPPED, 0);
        assert!(parsed.capabilities & capability::CLIENT_DEPRECATE_EOF != 0);

        assert_eq!(h.session.frontend.state(), State::Authenticating);
        assert_eq!(h.session.backend.state(), State::Authenticating);
        assert!(h.session.frontend.interest().is_readable());
        assert_eq!(h.session.backend.server_version.as_deref(), Some("8.0.36"));
    }

    #[test]
    fn test_greeting_split_across_reads() {
        let mut h = Harness::new();
        let greeting = framed(0, &greeting_payload());
        for chunk in greeting.chunks(5) {
            assert_eq!(h.session.backend.state(), State::Connecting);
            h.server.push_inbound(chunk);
            h.pump().unwrap();
        }
        assert_eq!(h.session.backend.state(), State::Authenticating);
        assert_eq!(h.client.written().len(), greeting.len());
    }

    #[test]
    fn test_backend_refusal_is_relayed_then_closed() {
        let mut h = Harness::new();
        let refusal = framed(0, &err_payload(1040, "Too many connections"));
        h.server.push_inbound(&refusal);
        h.pump().unwrap();

        assert_eq!(h.client.written(), refusal);
        assert!(h.session.is_finished());
    }

    #[test]
    fn test_wrong_protocol_version_is_a_violation() {
        let mut h = Harness::new();
        h.server.push_inbound(&framed(0, b"\x09junk\0"));
        assert!(matches!(h.pump(), Err(SessionError::Protocol(_))));
        h.teardown();
        assert_eq!(h.pool.stats().outstanding, 0);
    }

    #[test]
    fn test_backend_eof_before_greeting() {
        let mut h = Harness::new();
        h.server.close_inbound();
        let err = h.pump().unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(h.session.connection(Side::Frontend).state(), State::Connecting);
    }
}
