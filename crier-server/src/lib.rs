//! HTTP front end for the [`crier`] event broadcaster.
//!
//! Clients open a server-sent events stream at `GET /events` and receive
//! broadcasts, publishes to groups they have joined, and whispers addressed to
//! them. Publishers and operators drive the broker over a small HTTP API; see
//! [`api`] for the route table.
//!
//! # Example
//!
//! ```no_run
//! use crier::{Broker, BrokerConfig};
//! use crier_server::{CrierServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = Broker::start(BrokerConfig::default())?;
//!     let server = CrierServer::start(ServerConfig::default(), broker).await?;
//!
//!     server.broker().broadcast("server is up")?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod stream;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use logging::{init_logging, LoggingError, LoggingMode};
pub use server::CrierServer;
pub use stream::SseTransport;
