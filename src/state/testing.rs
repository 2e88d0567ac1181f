//! A miniature reactor for exercising handlers against mock sockets.

use crate::buffer::BufferPool;
use crate::connection::socket::mock::MockSocket;
use crate::connection::{Connection, Session, Side};
use crate::protocol::fixtures::{framed, greeting_payload, handshake_response_payload, ok_payload};
use crate::state::{Context, Event, SessionError};
use crate::stats::ProxyStats;

/// Upper bound on dispatches per `pump`, so a handler that never settles
/// fails the test instead of hanging it.
const MAX_DISPATCHES: usize = 100_000;

pub struct Harness {
    pub session: Session,
    /// The client's view of the frontend socket
    pub client: MockSocket,
    /// The server's view of the backend socket
    pub server: MockSocket,
    pub pool: BufferPool,
    pub stats: ProxyStats,
    /// Set once the session was torn down
    pub finished: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_buffer_size(64 * 1024)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let client = MockSocket::new();
        let server = MockSocket::new();
        let frontend = Connection::new(Side::Frontend, Box::new(client.clone()));
        let backend = Connection::new(Side::Backend, Box::new(server.clone()));

        Self {
            session: Session::new(1, frontend, backend),
            client,
            server,
            pool: BufferPool::new(buffer_size, 8),
            stats: ProxyStats::new(),
            finished: false,
        }
    }

    pub fn dispatch(&mut self, side: Side, event: Event) -> Result<(), SessionError> {
        let mut ctx = Context {
            pool: &mut self.pool,
            stats: &self.stats,
        };
        self.session.handle(side, event, &mut ctx)
    }

    fn ready_event(&self, side: Side) -> Option<Event> {
        let interest = self.session.connection(side).interest();
        let socket = match side {
            Side::Frontend => &self.client,
            Side::Backend => &self.server,
        };
        if interest.is_writable() && socket.is_write_ready() {
            Some(Event::Writable)
        } else if interest.is_readable() && socket.is_read_ready() {
            Some(Event::Readable)
        } else {
            None
        }
    }

    /// Dispatches readiness events until nothing is ready.
    ///
    /// Stops at the first handler error, leaving the session as the handler
    /// left it. A finished session is torn down.
    pub fn pump(&mut self) -> Result<(), SessionError> {
        for _ in 0..MAX_DISPATCHES {
            if self.finished {
                return Ok(());
            }
            if self.session.is_finished() {
                self.teardown();
                return Ok(());
            }

            let next = [Side::Frontend, Side::Backend]
                .into_iter()
                .find_map(|side| self.ready_event(side).map(|event| (side, event)));
            match next {
                Some((side, event)) => self.dispatch(side, event)?,
                None => return Ok(()),
            }
        }
        panic!("session did not settle after {} dispatches", MAX_DISPATCHES);
    }

    /// What the reactor does after an error or once a session finishes.
    pub fn teardown(&mut self) {
        self.session.close();
        self.session.release(&mut self.pool);
        self.finished = true;
    }

    /// Runs greeting, handshake response and OK, leaving both sides idle
    /// with all socket output drained.
    pub fn establish(&mut self, schema: Option<&str>) {
        self.server.push_inbound(&framed(0, &greeting_payload()));
        self.pump().unwrap();
        self.client
            .push_inbound(&framed(1, &handshake_response_payload(schema)));
        self.pump().unwrap();
        self.server.push_inbound(&framed(2, &ok_payload(0x0002)));
        self.pump().unwrap();

        self.client.take_written();
        self.server.take_written();
    }
}
