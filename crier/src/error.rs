//! Error types for the crier crate.

/// Errors surfaced by the broker and the streaming session adapter.
#[derive(Debug, thiserror::Error)]
pub enum CrierError {
    /// The command loop has shut down and no longer accepts commands
    #[error("Broker is closed")]
    BrokerClosed,

    /// The inbound transport cannot stream incremental writes
    #[error("Streaming is not supported by this transport")]
    StreamingUnsupported,

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A transport write failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote end is gone
    #[error("Transport closed")]
    Closed,

    /// The write could not be completed or flushed
    #[error("Write failed: {0}")]
    Write(String),
}

/// Errors from pushing a delivery into a listener's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The owning session has already gone away
    #[error("Listener outbox is closed")]
    Closed,
}

/// Convenience type alias for Results using CrierError.
pub type Result<T> = std::result::Result<T, CrierError>;
