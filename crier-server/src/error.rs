//! Error types for the HTTP front end

use crier::CrierError;

use crate::logging::LoggingError;

/// Errors raised while starting or running the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("No available port found in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("Failed to bind HTTP server: {0}")]
    Bind(#[from] warp::Error),

    #[error("Invalid server configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Broker(#[from] CrierError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

pub type Result<T> = std::result::Result<T, ServerError>;
