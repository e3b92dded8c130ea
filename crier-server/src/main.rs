use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crier::{Broker, BrokerConfig};
use crier_server::{init_logging, CrierServer, LoggingMode, ServerConfig};
use tracing::info;

/// Server-sent events broadcaster
///
/// Streams broadcasts, group publishes and whispers to clients connected at
/// GET /events, and accepts messages over a small HTTP API.
#[derive(Parser, Debug)]
#[command(name = "crier-server")]
#[command(about = "Server-sent events broadcaster with groups and bounded history")]
#[command(version)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "CRIER_BIND", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// First port to try
    #[arg(long, env = "CRIER_PORT_START", default_value = "7070")]
    pub port_start: u16,

    /// Last port to try
    #[arg(long, env = "CRIER_PORT_END", default_value = "7170")]
    pub port_end: u16,

    /// Number of recent events kept in history
    #[arg(long, env = "CRIER_HISTORY_SIZE", default_value = "20")]
    pub history_size: usize,

    /// Per-write delivery timeout in milliseconds
    #[arg(long, env = "CRIER_DELIVERY_TIMEOUT_MS", default_value = "5000")]
    pub delivery_timeout_ms: u64,

    /// Back-to-back write timeouts before a slow listener is disconnected
    #[arg(long, env = "CRIER_MAX_CONSECUTIVE_TIMEOUTS", default_value = "3")]
    pub max_consecutive_timeouts: u32,

    /// Milliseconds shutdown waits for open streams to close
    #[arg(long, env = "CRIER_SHUTDOWN_TIMEOUT_MS", default_value = "5000")]
    pub shutdown_timeout_ms: u64,

    /// Seconds between SSE keep-alive comments
    #[arg(long, env = "CRIER_KEEP_ALIVE_SECS", default_value = "15")]
    pub keep_alive_secs: u64,

    /// Largest accepted message body in bytes
    #[arg(long, env = "CRIER_MAX_BODY_BYTES", default_value = "65536")]
    pub max_body_bytes: u64,

    /// Logging mode (silent, development, debug)
    #[arg(long, env = "CRIER_LOG_MODE", default_value = "development")]
    pub log_mode: LoggingMode,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.port_start > self.port_end {
            return Err(anyhow::anyhow!(
                "Invalid port range: start ({}) > end ({})",
                self.port_start,
                self.port_end
            ));
        }

        if self.delivery_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Delivery timeout must be positive"));
        }

        if self.max_consecutive_timeouts == 0 {
            return Err(anyhow::anyhow!("Max consecutive timeouts must be positive"));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Shutdown timeout must be positive"));
        }

        if self.keep_alive_secs == 0 {
            return Err(anyhow::anyhow!("Keep-alive interval must be positive"));
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub server: ServerConfig,
    pub log_mode: LoggingMode,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let broker = BrokerConfig::default()
            .with_history_size(args.history_size)
            .with_delivery_timeout(Duration::from_millis(args.delivery_timeout_ms))
            .with_max_consecutive_timeouts(args.max_consecutive_timeouts)
            .with_shutdown_timeout(Duration::from_millis(args.shutdown_timeout_ms));

        let server = ServerConfig::default()
            .with_bind_address(args.bind)
            .with_port_range(args.port_start, args.port_end)
            .with_keep_alive_interval(Duration::from_secs(args.keep_alive_secs))
            .with_max_body_bytes(args.max_body_bytes);

        Self {
            broker,
            server,
            log_mode: args.log_mode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    let config = Config::from(args);

    init_logging(config.log_mode).context("Failed to initialize logging")?;

    let broker = Broker::start(config.broker).context("Failed to start broker")?;
    let server = CrierServer::start(config.server, broker)
        .await
        .context("Failed to start HTTP server")?;

    info!("Streaming events at {}/events", server.base_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    server.shutdown().await.context("Shutdown failed")?;

    Ok(())
}
