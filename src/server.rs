//! Accepting clients and spreading them over reactors.

use crate::config::ProxyConfig;
use crate::reactor::{BackendConnector, Reactor, ReactorThread, TcpConnector};
use crate::stats::ProxyStats;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// The proxy: one accept loop feeding N reactor threads.
pub struct ProxyServer {
    config: ProxyConfig,
    connector: Arc<dyn BackendConnector>,
    stats: Arc<ProxyStats>,
}

impl ProxyServer {
    /// Relays every session to `config.backend` over TCP.
    pub fn new(config: ProxyConfig) -> Self {
        let connector = TcpConnector::new(config.backend, config.connect_timeout);
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: ProxyConfig, connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            config,
            connector,
            stats: Arc::new(ProxyStats::new()),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ProxyStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts clients on `listener` until `shutdown` completes, then stops
    /// every reactor and waits for their threads.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let count = self.config.reactors.max(1);
        let mut reactors = Vec::with_capacity(count);
        for index in 0..count {
            let reactor = Reactor::spawn(
                index,
                &self.config,
                Arc::clone(&self.connector),
                Arc::clone(&self.stats),
            );
            match reactor {
                Ok(reactor) => reactors.push(reactor),
                Err(e) => {
                    stop(reactors);
                    return Err(e);
                }
            }
        }
        info!(
            addr = ?listener.local_addr().ok(),
            backend = %self.config.backend,
            reactors = count,
            "proxy listening"
        );

        tokio::select! {
            _ = self.accept_loop(&listener, &reactors) => {}
            _ = shutdown => {
                info!("shutdown signal received, stopping reactors");
            }
        }

        stop(reactors);
        let snap = self.stats.snapshot();
        info!(
            accepted = snap.sessions_accepted,
            failed = snap.sessions_failed,
            commands = snap.commands_relayed,
            "proxy stopped"
        );
        Ok(())
    }

    /// Hands accepted clients to the reactors round-robin.
    async fn accept_loop(&self, listener: &TcpListener, reactors: &[ReactorThread]) {
        let mut next = 0;
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };
            self.stats.session_accepted();

            if let Err(e) = stream.set_nodelay(true) {
                warn!(client = %addr, error = %e, "failed to set TCP_NODELAY");
            }
            let stream = match stream.into_std() {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(client = %addr, error = %e, "failed to detach client socket");
                    self.stats.session_failed();
                    continue;
                }
            };

            let index = next;
            next = (next + 1) % reactors.len();
            match reactors[index].handle().register(stream) {
                Ok(id) => debug!(session = id, client = %addr, reactor = index, "client accepted"),
                Err(e) => {
                    error!(client = %addr, error = %e, "reactor is gone");
                    self.stats.session_failed();
                }
            }
        }
    }
}

/// Sends `Shutdown` to every reactor and joins its thread.
fn stop(reactors: Vec<ReactorThread>) {
    for reactor in &reactors {
        // A reactor that already exited has nothing left to stop
        let _ = reactor.handle().shutdown();
    }
    for reactor in reactors {
        if reactor.join().is_err() {
            error!("reactor thread panicked");
        }
    }
}
