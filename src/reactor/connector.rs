//! Opening backend connections.

use crate::connection::Socket;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tracing::trace;

/// A backend connect in progress.
///
/// The future runs on the reactor thread that asked for it, so it does not
/// need to be `Send`.
pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<Box<dyn Socket>>>>>;

/// Where sessions get their backend socket from.
///
/// `schema` is the database the client asked for, when already known;
/// a connector may use it to pick a server.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, schema: Option<&str>) -> ConnectFuture;
}

/// Connects every session to one MySQL server over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl BackendConnector for TcpConnector {
    fn connect(&self, _schema: Option<&str>) -> ConnectFuture {
        let addr = self.addr;
        let timeout = self.timeout;

        Box::pin(async move {
            let stream = time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, timeout),
                    )
                })??;
            stream.set_nodelay(true)?;
            trace!(backend = %addr, "backend connected");

            let socket: Box<dyn Socket> = Box::new(stream);
            Ok::<_, io::Error>(socket)
        })
    }
}
