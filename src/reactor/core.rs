//! Reactor event loop
//!
//! Owns the sessions of one thread: polls their sockets, the pending
//! backend connects, the command channel and the idle sweep, then runs
//! each ready event through the session's state handler.

use crate::buffer::BufferPool;
use crate::config::ProxyConfig;
use crate::connection::{Connection, Interest, Session, SessionId, Side, Socket};
use crate::protocol::{encode, ErrPacket};
use crate::reactor::connector::{BackendConnector, ConnectFuture};
use crate::reactor::handle::{Command, ReactorHandle};
use crate::state::{Context as HandlerContext, Event, SessionError, State};
use crate::stats::ProxyStats;
use bytes::Buf;
use std::collections::HashMap;
use std::future::{poll_fn, Future};
use std::io::{self, Write};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const IDLE_MESSAGE: &str = "The client was disconnected by the server because of inactivity";

/// A client waiting for its backend socket.
struct PendingConnect {
    id: SessionId,
    client: TcpStream,
    connect: ConnectFuture,
}

/// Everything that became ready in one wakeup.
#[derive(Default)]
struct Turn {
    commands: Vec<Command>,
    connected: Vec<(SessionId, TcpStream, io::Result<Box<dyn Socket>>)>,
    events: Vec<(SessionId, Side, io::Result<Event>)>,
    sweep: bool,
}

impl Turn {
    fn is_empty(&self) -> bool {
        self.commands.is_empty()
            && self.connected.is_empty()
            && self.events.is_empty()
            && !self.sweep
    }
}

/// One event loop and the sessions it owns.
///
/// A reactor is pinned to one thread. Its sessions, its buffer pool and
/// every handler call stay on that thread.
pub struct Reactor {
    index: usize,
    pool: BufferPool,
    stats: Arc<ProxyStats>,
    connector: Arc<dyn BackendConnector>,
    commands: mpsc::UnboundedReceiver<Command>,
    sessions: HashMap<SessionId, Session>,
    pending: Vec<PendingConnect>,
    idle_timeout: Option<Duration>,
    sweep_interval: Duration,
}

/// A reactor running on its own thread.
#[derive(Debug)]
pub struct ReactorThread {
    handle: ReactorHandle,
    thread: thread::JoinHandle<()>,
}

impl ReactorThread {
    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Waits for the reactor to exit.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

impl Reactor {
    pub(crate) fn new(
        index: usize,
        config: &ProxyConfig,
        connector: Arc<dyn BackendConnector>,
        stats: Arc<ProxyStats>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            index,
            pool: BufferPool::new(config.buffer_size, config.max_pooled_buffers),
            stats,
            connector,
            commands,
            sessions: HashMap::new(),
            pending: Vec::new(),
            idle_timeout: config.idle_timeout,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Starts a reactor on a new thread with a current-thread runtime.
    pub fn spawn(
        index: usize,
        config: &ProxyConfig,
        connector: Arc<dyn BackendConnector>,
        stats: Arc<ProxyStats>,
    ) -> io::Result<ReactorThread> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (handle, commands) = ReactorHandle::channel();
        let config = config.clone();

        let thread = thread::Builder::new()
            .name(format!("reactor-{}", index))
            .spawn(move || {
                let reactor = Reactor::new(index, &config, connector, stats, commands);
                runtime.block_on(reactor.run());
            })?;

        Ok(ReactorThread { handle, thread })
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    pub async fn run(mut self) {
        info!(reactor = self.index, "reactor started");

        let mut sweep = self.idle_timeout.map(|_| {
            let mut interval = time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            let turn = poll_fn(|cx| self.poll_turn(cx, sweep.as_mut())).await;

            for command in turn.commands {
                match command {
                    Command::Register { id, stream } => self.register(id, stream),
                    Command::CloseSession(id) => self.force_close(id),
                    Command::Shutdown => {
                        self.shutdown();
                        return;
                    }
                }
            }
            for (id, client, result) in turn.connected {
                self.on_connected(id, client, result);
            }
            for (id, side, readiness) in turn.events {
                self.dispatch(id, side, readiness);
            }
            if turn.sweep {
                self.sweep_idle(Instant::now());
            }
        }
    }

    /// Collects commands, finished connects, socket readiness and the sweep
    /// tick. Registers the task's waker with everything still pending.
    fn poll_turn(&mut self, cx: &mut Context<'_>, sweep: Option<&mut Interval>) -> Poll<Turn> {
        let mut turn = Turn::default();

        loop {
            match self.commands.poll_recv(cx) {
                Poll::Ready(Some(command)) => turn.commands.push(command),
                Poll::Ready(None) => {
                    turn.commands.push(Command::Shutdown);
                    break;
                }
                Poll::Pending => break,
            }
        }

        let mut i = 0;
        while i < self.pending.len() {
            if let Poll::Ready(result) = self.pending[i].connect.as_mut().poll(cx) {
                let pending = self.pending.swap_remove(i);
                turn.connected.push((pending.id, pending.client, result));
            } else {
                i += 1;
            }
        }

        for (&id, session) in &self.sessions {
            for side in [Side::Frontend, Side::Backend] {
                let conn = session.connection(side);
                let interest = conn.interest();

                if interest.is_writable() {
                    match conn.socket().poll_write_ready(cx) {
                        Poll::Ready(Ok(())) => turn.events.push((id, side, Ok(Event::Writable))),
                        Poll::Ready(Err(e)) => {
                            turn.events.push((id, side, Err(e)));
                            continue;
                        }
                        Poll::Pending => {}
                    }
                }
                if interest.is_readable() {
                    match conn.socket().poll_read_ready(cx) {
                        Poll::Ready(Ok(())) => turn.events.push((id, side, Ok(Event::Readable))),
                        Poll::Ready(Err(e)) => turn.events.push((id, side, Err(e))),
                        Poll::Pending => {}
                    }
                }
            }
        }

        if let Some(interval) = sweep {
            turn.sweep = interval.poll_tick(cx).is_ready();
        }

        if turn.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(turn)
        }
    }

    fn register(&mut self, id: SessionId, stream: std::net::TcpStream) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(session = id, error = %e, "failed to configure client socket");
            self.stats.session_failed();
            return;
        }
        let client = match TcpStream::from_std(stream) {
            Ok(client) => client,
            Err(e) => {
                warn!(session = id, error = %e, "failed to register client socket");
                self.stats.session_failed();
                return;
            }
        };

        debug!(
            session = id,
            reactor = self.index,
            client = ?client.peer_addr().ok(),
            "connecting to backend"
        );
        let connect = self.connector.connect(None);
        self.pending.push(PendingConnect {
            id,
            client,
            connect,
        });
    }

    fn on_connected(
        &mut self,
        id: SessionId,
        client: TcpStream,
        result: io::Result<Box<dyn Socket>>,
    ) {
        match result {
            Ok(socket) => {
                let frontend = Connection::new(Side::Frontend, Box::new(client));
                let backend = Connection::new(Side::Backend, socket);
                info!(
                    session = id,
                    reactor = self.index,
                    client = ?frontend.peer_addr(),
                    backend = ?backend.peer_addr(),
                    "session opened"
                );
                self.sessions.insert(id, Session::new(id, frontend, backend));
                self.stats.session_opened();
            }
            Err(e) => {
                warn!(session = id, error = %e, "backend connect failed");
                self.stats.session_failed();
                self.reject(id, client, &e);
            }
        }
    }

    /// Tells a client its backend is unreachable, then drops its socket.
    ///
    /// The client was never polled, so tokio has no write readiness for it
    /// yet. The packet goes out through the non-blocking std socket, which
    /// only needs room in the kernel send buffer.
    fn reject(&mut self, id: SessionId, client: TcpStream, cause: &io::Error) {
        let err = ErrPacket::new(
            0,
            ErrPacket::CONN_HOST_ERROR,
            format!("Can't connect to MySQL server: {}", cause),
        );
        let mut buf = self.pool.allocate(256);
        let sent = match encode(&err, &mut buf) {
            Ok(()) => client
                .into_std()
                .and_then(|mut stream| write_all_nonblocking(&mut stream, buf.chunk())),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        };
        self.pool.release(buf);

        match sent {
            Ok(()) => debug!(session = id, "sent connect error to client"),
            Err(e) => warn!(session = id, error = %e, "failed to send connect error to client"),
        }
    }

    /// Runs one readiness event through the session's current state.
    fn dispatch(&mut self, id: SessionId, side: Side, readiness: io::Result<Event>) {
        // An earlier event in this turn may have torn the session down
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let result = match readiness {
            Ok(event) => {
                if !wants(session.connection(side).interest(), event) {
                    return;
                }
                session.touch();
                let mut ctx = HandlerContext {
                    pool: &mut self.pool,
                    stats: &self.stats,
                };
                session.handle(side, event, &mut ctx)
            }
            Err(e) => Err(SessionError::Io(e)),
        };

        match result {
            Ok(()) => {
                if session.is_finished() {
                    self.teardown(id);
                }
            }
            Err(e) => {
                log_failure(id, side, &e);
                self.teardown(id);
            }
        }
    }

    /// Closes every session that saw no traffic for `idle_timeout`.
    fn sweep_idle(&mut self, now: Instant) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| now.saturating_duration_since(session.last_active()) >= timeout)
            .map(Session::id)
            .collect();

        for id in expired {
            self.expire(id);
        }
    }

    fn expire(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        // Only a session between commands can take an error packet
        // without corrupting a relay in flight
        let state = session.frontend.state();
        if state != State::Idle || session.frontend.has_pending_write() {
            info!(session = id, ?state, "idle timeout");
            self.teardown(id);
            return;
        }

        info!(session = id, "idle timeout, disconnecting client");
        let err = ErrPacket::new(0, ErrPacket::INTERACTION_TIMEOUT, IDLE_MESSAGE);
        match session.frontend.write_packet(&err, &mut self.pool) {
            Ok(()) => session.close(),
            Err(e) => {
                log_failure(id, Side::Frontend, &e);
                self.teardown(id);
            }
        }
    }

    fn force_close(&mut self, id: SessionId) {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.id != id);
        if self.pending.len() != before {
            self.stats.session_failed();
            info!(session = id, "closed before the backend connected");
            return;
        }

        if self.sessions.contains_key(&id) {
            info!(session = id, "closing session on request");
            self.teardown(id);
        }
    }

    /// Releases the session's buffers and drops both sockets.
    fn teardown(&mut self, id: SessionId) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.close();
        session.release(&mut self.pool);
        self.stats.session_closed();

        info!(
            session = id,
            duration_ms = session.created().elapsed().as_millis() as u64,
            upstream = session.backend.bytes_written(),
            downstream = session.frontend.bytes_written(),
            "session closed"
        );
    }

    fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        info!(
            reactor = self.index,
            sessions = ids.len(),
            pending = self.pending.len(),
            "reactor shutting down"
        );
        for id in ids {
            self.teardown(id);
        }
        self.pending.clear();
    }
}

/// False when an earlier dispatch in the same turn turned the interest off.
fn wants(interest: Interest, event: Event) -> bool {
    match event {
        Event::Readable => interest.is_readable(),
        Event::Writable => interest.is_writable(),
        Event::Drive => true,
    }
}

fn log_failure(id: SessionId, side: Side, error: &SessionError) {
    if error.is_disconnect() {
        debug!(session = id, side = %side, error = %error, "peer disconnected");
    } else if error.is_bug() {
        error!(session = id, side = %side, error = %error, "relay bookkeeping failed");
    } else {
        warn!(session = id, side = %side, error = %error, "session failed");
    }
}

/// Writes `data` to a non-blocking socket, giving up on `WouldBlock`.
fn write_all_nonblocking(stream: &mut std::net::TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
