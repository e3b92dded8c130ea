//! HTTP server lifecycle.

use std::net::{IpAddr, SocketAddr, TcpListener};

use crier::Broker;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// HTTP front end for a running [`Broker`].
///
/// Binds the first free port in the configured range and serves the event
/// stream and publisher API until [`shutdown`](CrierServer::shutdown).
///
/// # Example
///
/// ```no_run
/// use crier::{Broker, BrokerConfig};
/// use crier_server::{CrierServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> crier_server::Result<()> {
///     let broker = Broker::start(BrokerConfig::default())?;
///     let server = CrierServer::start(ServerConfig::default(), broker).await?;
///
///     println!("Streaming events at {}/events", server.base_url());
///
///     server.shutdown().await
/// }
/// ```
pub struct CrierServer {
    /// The port the server is bound to
    port: u16,
    /// `http://<address>:<port>`
    base_url: String,
    broker: Broker,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<JoinHandle<()>>,
}

impl CrierServer {
    /// Bind the first available port in `config.port_range` and start serving.
    pub async fn start(config: ServerConfig, broker: Broker) -> Result<Self> {
        config.validate()?;

        let (start, end) = config.port_range;
        let port = Self::find_available_port(config.bind_address, start, end)
            .ok_or(ServerError::NoAvailablePort { start, end })?;

        let routes = api::routes(broker.clone(), &config);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(
            SocketAddr::new(config.bind_address, port),
            async move {
                shutdown_rx.recv().await;
            },
        )?;

        let server_handle = tokio::spawn(server);
        info!(%addr, "crier server listening");

        Ok(Self {
            port: addr.port(),
            base_url: format!("http://{addr}"),
            broker,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The broker this server fronts.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Shut the broker down, which ends every open event stream, then stop
    /// the HTTP server once in-flight requests complete.
    pub async fn shutdown(mut self) -> Result<()> {
        self.broker.shutdown().await?;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                warn!("HTTP server task ended abnormally: {}", e);
            }
        }

        info!(port = self.port, "crier server stopped");
        Ok(())
    }

    /// Find an available port in the given range.
    fn find_available_port(address: IpAddr, start: u16, end: u16) -> Option<u16> {
        (start..=end).find(|&port| Self::is_port_available(address, port))
    }

    /// Check if a port is available for binding.
    fn is_port_available(address: IpAddr, port: u16) -> bool {
        TcpListener::bind(SocketAddr::new(address, port)).is_ok()
    }
}

impl std::fmt::Debug for CrierServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrierServer")
            .field("base_url", &self.base_url)
            .field("running", &self.shutdown_tx.is_some())
            .finish()
    }
}
