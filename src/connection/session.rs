//! Sessions: a frontend and a backend connection, paired for life.

use crate::buffer::BufferPool;
use crate::connection::Connection;
use crate::protocol::{ResponseKind, ResponseTracker};
use crate::state::{Context, Event, SessionError, State};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

/// Identifies a session; unique across every reactor in the process.
pub type SessionId = u64;

/// Which socket of a session an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Frontend,
    Backend,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Frontend => write!(f, "frontend"),
            Side::Backend => write!(f, "backend"),
        }
    }
}

/// The client-facing connection.
#[derive(Debug)]
pub struct FrontendConnection {
    conn: Connection,
    /// Currently selected schema
    pub schema: Option<String>,
    /// Schema requested by an in-flight `COM_INIT_DB`
    pub pending_schema: Option<String>,
    /// Capabilities the client announced in its handshake response
    pub capabilities: u32,
    /// Whether the client's handshake response has been seen
    pub handshake_seen: bool,
    /// The response shape of the command being relayed
    pub pending_response: ResponseKind,
}

impl FrontendConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            schema: None,
            pending_schema: None,
            capabilities: 0,
            handshake_seen: false,
            pending_response: ResponseKind::None,
        }
    }
}

impl Deref for FrontendConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for FrontendConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// The database-facing connection.
#[derive(Debug)]
pub struct BackendConnection {
    conn: Connection,
    pub server_version: Option<String>,
    /// Server thread id from the greeting
    pub connection_id: u32,
    /// Capabilities the server advertised, minus the stripped ones
    pub capabilities: u32,
    /// Tracks where the current response ends
    pub tracker: ResponseTracker,
}

impl BackendConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            server_version: None,
            connection_id: 0,
            capabilities: 0,
            tracker: ResponseTracker::new(),
        }
    }
}

impl Deref for BackendConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for BackendConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// A proxied client session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    pub frontend: FrontendConnection,
    pub backend: BackendConnection,
    created: Instant,
    last_active: Instant,
}

impl Session {
    /// Pairs two freshly connected sockets. Both start in `Connecting`; the
    /// backend waits for the server greeting.
    pub fn new(id: SessionId, frontend: Connection, backend: Connection) -> Self {
        let now = Instant::now();
        let mut session = Self {
            id,
            frontend: FrontendConnection::new(frontend),
            backend: BackendConnection::new(backend),
            created: now,
            last_active: now,
        };
        session.backend.enable_read();
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn connection(&self, side: Side) -> &Connection {
        match side {
            Side::Frontend => &self.frontend,
            Side::Backend => &self.backend,
        }
    }

    /// Both connections at once.
    pub fn split_mut(&mut self) -> (&mut FrontendConnection, &mut BackendConnection) {
        (&mut self.frontend, &mut self.backend)
    }

    /// Dispatches `event` to the handler for `side`'s current state.
    pub fn handle(
        &mut self,
        side: Side,
        event: Event,
        ctx: &mut Context<'_>,
    ) -> Result<(), SessionError> {
        let handler = self.connection(side).state().handler(side);
        handler.handle(self, ctx, event)
    }

    /// Runs `side`'s handler synchronously on behalf of its peer.
    pub fn drive(&mut self, side: Side, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.handle(side, Event::Drive, ctx)
    }

    /// Moves both sides to `Closing`. Reads stop; a pending frontend write
    /// (such as an error packet) may still drain.
    pub fn close(&mut self) {
        self.frontend.set_state(State::Closing);
        self.backend.set_state(State::Closing);
        self.frontend.disable_read();
        self.backend.disable_read();
        self.backend.disable_write();
        if self.frontend.has_pending_write() {
            self.frontend.enable_write();
        }
    }

    /// True once the session can be torn down.
    pub fn is_finished(&self) -> bool {
        self.frontend.state() == State::Closing
            && self.backend.state() == State::Closing
            && !self.frontend.has_pending_write()
    }

    /// Returns every buffer of both connections to the pool.
    pub fn release(&mut self, pool: &mut BufferPool) {
        self.frontend.release_buffers(pool);
        self.backend.release_buffers(pool);
    }
}
