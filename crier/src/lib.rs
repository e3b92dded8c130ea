//! # crier
//!
//! A server-side event broadcaster core. Long-lived streaming connections are
//! registered as listeners with a single [`Broker`], which distributes
//! messages to everyone (broadcast), to a named group (publish), or to one
//! listener (whisper), and keeps a bounded history of what it distributed.
//!
//! ## Architecture
//!
//! - [`Broker`]: cloneable handle onto one command loop task. All membership,
//!   group and history mutations are serialized through it.
//! - [`Listener`] / [`Inbox`]: the broker-side and session-side halves of one
//!   subscriber. Deliveries are queued per listener, so a stalled subscriber
//!   never blocks delivery to the others.
//! - [`GroupRegistry`]: named subsets, created on first join and dropped when
//!   their last member leaves.
//! - [`History`]: fixed-capacity log of recent events with monotonically
//!   increasing ids.
//! - [`Session`]: binds one [`Transport`] to a listener for the connection's
//!   lifetime and guarantees a single unregister however it ends.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crier::prelude::*;
//!
//! let broker = Broker::start(BrokerConfig::default())?;
//!
//! // One per accepted connection, typically spawned.
//! let session = Session::open(&broker, transport)?;
//! tokio::spawn(session.run());
//!
//! broker.broadcast("hello")?;
//! ```
//!
//! The HTTP front end lives in the `crier-server` crate.

pub mod broker;
pub mod config;
pub mod error;
pub mod group;
pub mod history;
pub mod listener;
pub mod session;

pub use broker::{Broker, BrokerStats};
pub use config::BrokerConfig;
pub use error::{CrierError, Result, SendError, TransportError};
pub use group::GroupRegistry;
pub use history::{Event, EventId, EventKind, EventTarget, History};
pub use listener::{Delivery, DisconnectRequest, Inbox, Listener, ListenerId};
pub use session::{EndReason, Session, SessionEnd, SessionState, Transport};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Broker, BrokerConfig, CrierError, Delivery, EndReason, EventId, EventKind, Inbox,
        ListenerId, Result, Session, SessionEnd, Transport, TransportError,
    };
}
