//! mysql-relay - A Non-Blocking MySQL Wire-Protocol Proxy
//!
//! This is the main entry point for the proxy.
//! It parses the command line, sets up logging and runs the server until Ctrl+C.

use clap::Parser;
use mysql_relay::{ProxyConfig, ProxyServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// A non-blocking MySQL wire-protocol proxy
#[derive(Debug, Parser)]
#[command(name = "mysql-relay", version)]
struct Cli {
    /// Address to accept client connections on
    #[arg(short, long, default_value = "127.0.0.1:3307")]
    listen: SocketAddr,

    /// MySQL server to relay sessions to
    #[arg(short, long, default_value = "127.0.0.1:3306")]
    backend: SocketAddr,

    /// Number of reactor threads (default: one per CPU)
    #[arg(long)]
    reactors: Option<usize>,

    /// Size of each pooled buffer in bytes
    #[arg(long, default_value_t = mysql_relay::buffer::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Close sessions idle for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Backend connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> ProxyConfig {
        let defaults = ProxyConfig::default();
        ProxyConfig {
            listen: self.listen,
            backend: self.backend,
            reactors: self.reactors.unwrap_or(defaults.reactors).max(1),
            buffer_size: self.buffer_size,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
            ..defaults
        }
    }
}

fn print_banner(config: &ProxyConfig) {
    println!(
        r#"
   mysql-relay v{}
──────────────────────────────────────────────
Listening on   {}
Relaying to    {}
Reactors       {}
Buffer size    {} KiB

Use Ctrl+C to shutdown gracefully.
"#,
        mysql_relay::VERSION,
        config.listen,
        config.backend,
        config.reactors,
        config.buffer_size / 1024
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    let config = cli.into_config();
    print_banner(&config);

    let listener = TcpListener::bind(config.listen).await?;
    info!("Listening on {}", config.listen);

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping proxy...");
    };

    let server = ProxyServer::new(config);
    server.serve(listener, shutdown).await?;

    info!("Proxy shutdown complete");
    Ok(())
}
