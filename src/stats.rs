//! Proxy-wide counters, shared by every reactor.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the proxy
#[derive(Debug, Default)]
pub struct ProxyStats {
    /// Total number of client sessions accepted
    pub sessions_accepted: AtomicU64,
    /// Currently active sessions
    pub active_sessions: AtomicU64,
    /// Sessions that never reached the backend
    pub sessions_failed: AtomicU64,
    /// Client commands forwarded to a backend
    pub commands_relayed: AtomicU64,
    /// Bytes written to backends
    pub bytes_client_to_backend: AtomicU64,
    /// Bytes written to clients
    pub bytes_backend_to_client: AtomicU64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_accepted(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_relayed(&self) {
        self.commands_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_upstream(&self, count: u64) {
        self.bytes_client_to_backend
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_downstream(&self, count: u64) {
        self.bytes_backend_to_client
            .fetch_add(count, Ordering::Relaxed);
    }

    /// A point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            commands_relayed: self.commands_relayed.load(Ordering::Relaxed),
            bytes_client_to_backend: self.bytes_client_to_backend.load(Ordering::Relaxed),
            bytes_backend_to_client: self.bytes_backend_to_client.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`ProxyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions_accepted: u64,
    pub active_sessions: u64,
    pub sessions_failed: u64,
    pub commands_relayed: u64,
    pub bytes_client_to_backend: u64,
    pub bytes_backend_to_client: u64,
}
