//! Talking to a reactor from other threads.

use crate::connection::SessionId;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Session ids are unique across every reactor in the process.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Requests a reactor handles between readiness events.
#[derive(Debug)]
pub enum Command {
    /// Take over an accepted client socket and connect it to a backend
    Register { id: SessionId, stream: TcpStream },
    /// Tear a session down right away
    CloseSession(SessionId),
    /// Tear every session down and stop
    Shutdown,
}

#[derive(Debug, Error)]
#[error("reactor has shut down")]
pub struct ReactorClosed;

/// Cloneable sender side of a reactor's command channel.
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ReactorHandle {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hands an accepted client socket to the reactor and returns the id its
    /// session will have.
    pub fn register(&self, stream: TcpStream) -> Result<SessionId, ReactorClosed> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Register { id, stream })?;
        Ok(id)
    }

    /// Forces a session to close, whatever it is doing.
    pub fn close_session(&self, id: SessionId) -> Result<(), ReactorClosed> {
        self.send(Command::CloseSession(id))
    }

    pub fn shutdown(&self) -> Result<(), ReactorClosed> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), ReactorClosed> {
        self.tx.send(command).map_err(|_| ReactorClosed)
    }
}
