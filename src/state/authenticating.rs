//! `Authenticating`: relaying the handshake response and whatever
//! auth-switch / auth-more-data round trips follow, until the server
//! answers OK or ERR.
//!
//! The same state is re-entered after `COM_CHANGE_USER`.

use crate::connection::{Session, Side};
use crate::protocol::{header, HandshakeResponse41};
use crate::state::{transition, Context, Event, SessionError, State, StateHandler};
use tracing::{debug, info};

pub struct FrontendAuthenticating;

impl StateHandler for FrontendAuthenticating {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let id = session.id();
        let (frontend, backend) = session.split_mut();

        if event != Event::Readable {
            if !frontend.flush_write_buffer(ctx.pool)? {
                return Ok(());
            }
            frontend.enable_read();
            if !frontend.has_unscanned_input() {
                return Ok(());
            }
        }

        if backend.has_pending_write() {
            frontend.disable_read();
            backend.enable_write();
            return Ok(());
        }
        if event == Event::Readable {
            frontend.read(ctx.pool)?;
        }

        if !frontend.handshake_seen {
            let Some(response) = frontend.decode_packet::<HandshakeResponse41>()? else {
                return Ok(());
            };
            debug!(
                session = id,
                user = %response.username,
                schema = ?response.database,
                "client handshake"
            );
            frontend.capabilities = response.capabilities;
            frontend.schema = response.database;
            frontend.handshake_seen = true;
        } else if frontend.scan_packet(None)?.is_none() && frontend.scanner().is_at_boundary() {
            return Ok(());
        }

        frontend.relay_to(backend, ctx.pool)?;
        if !frontend.scanner().is_awaiting() {
            frontend.disable_read();
        }
        session.drive(Side::Backend, ctx)
    }
}

pub struct BackendAuthenticating;

impl StateHandler for BackendAuthenticating {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let id = session.id();
        let (frontend, backend) = session.split_mut();

        if event != Event::Readable {
            if backend.flush_write_buffer(ctx.pool)? {
                backend.enable_read();
            }
            return Ok(());
        }

        if frontend.has_pending_write() {
            backend.disable_read();
            frontend.enable_write();
            return Ok(());
        }
        backend.read(ctx.pool)?;

        let mut last = None;
        while backend.has_unscanned_input() {
            match backend.scan_packet(None)? {
                Some(head) => last = Some(head),
                None => break,
            }
        }
        if backend.relay_to(frontend, ctx.pool)? == 0 {
            return Ok(());
        }

        // Only a completed final packet can end the exchange
        let verdict = match last {
            Some(head) if backend.scanner().is_at_boundary() => head.first_byte(),
            _ => None,
        };
        match verdict {
            Some(header::OK) => {
                info!(session = id, schema = ?frontend.schema, "session authenticated");
                transition(session, State::Idle);
                session.backend.enable_read();
            }
            Some(header::ERR) => {
                debug!(session = id, "authentication failed");
                session.close();
            }
            // auth switch request or more data; the client answers next
            _ => {}
        }
        session.drive(Side::Frontend, ctx)
    }
}
