//! `Closing`: the session is on its way out.
//!
//! Nothing more is read from either side. The frontend may still hold an
//! error packet for the client; it drains it, and the reactor tears the
//! session down once it is empty.

use crate::connection::Session;
use crate::state::{Context, Event, SessionError, StateHandler};

pub struct FrontendClosing;

impl StateHandler for FrontendClosing {
    fn handle(
        &self,
        session: &mut Session,
        ctx: &mut Context<'_>,
        event: Event,
    ) -> Result<(), SessionError> {
        let frontend = &mut session.frontend;
        if event == Event::Readable {
            frontend.disable_read();
            return Ok(());
        }
        frontend.flush_write_buffer(ctx.pool)?;
        Ok(())
    }
}

pub struct BackendClosing;

impl StateHandler for BackendClosing {
    fn handle(
        &self,
        session: &mut Session,
        _ctx: &mut Context<'_>,
        _event: Event,
    ) -> Result<(), SessionError> {
        let backend = &mut session.backend;
        backend.disable_read();
        backend.disable_write();
        Ok(())
    }
}
