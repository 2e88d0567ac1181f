//! Proxy configuration.

use crate::buffer::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED};
use std::net::SocketAddr;
use std::time::Duration;

/// Everything the proxy needs to run.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address clients connect to
    pub listen: SocketAddr,

    /// The MySQL server every session is relayed to
    pub backend: SocketAddr,

    /// Number of reactor threads (default: available parallelism)
    pub reactors: usize,

    /// Size of each pooled buffer (default: 16 MiB)
    pub buffer_size: usize,

    /// Free buffers each reactor keeps around (default: 64)
    pub max_pooled_buffers: usize,

    /// How long to wait for the backend TCP connect (default: 5s)
    pub connect_timeout: Duration,

    /// Close sessions with no traffic for this long (default: never)
    pub idle_timeout: Option<Duration>,

    /// How often reactors look for idle sessions (default: 1s)
    pub sweep_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], crate::DEFAULT_PORT)),
            backend: SocketAddr::from(([127, 0, 0, 1], 3306)),
            reactors: std::thread::available_parallelism().map_or(1, |n| n.get()),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_pooled_buffers: DEFAULT_MAX_POOLED,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            sweep_interval: Duration::from_secs(1),
        }
    }
}
