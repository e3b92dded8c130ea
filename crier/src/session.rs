//! Streaming session adapter
//!
//! A [`Session`] binds one inbound streaming connection to a listener for the
//! connection's lifetime:
//!
//! ```text
//! Connecting ──► Active ──► Disconnecting ──► Closed
//!      │                                        ▲
//!      └──────── streaming unsupported ─────────┘
//! ```
//!
//! While active it drains the listener's deliveries onto the [`Transport`],
//! bounding every write by the broker's delivery timeout. It leaves the
//! active state when the remote end closes, when the broker forces a
//! disconnect, when the transport keeps timing out, or when the broker goes
//! away. Whichever fires first, the listener is unregistered exactly once and
//! any pending disconnect acknowledgements are fired after teardown.

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::error::{CrierError, Result, TransportError};
use crate::listener::{Delivery, DisconnectRequest, Inbox, ListenerId};

/// The outbound half of one streaming connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether incremental writes can be flushed to the remote end as they happen.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Write one delivery and flush it.
    async fn send(&self, delivery: &Delivery) -> std::result::Result<(), TransportError>;

    /// Resolves once the remote end has closed the connection.
    async fn closed(&self);
}

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnecting,
    Closed,
}

impl SessionState {
    fn advance(&mut self, next: SessionState, listener: ListenerId) {
        debug!(%listener, from = ?*self, to = ?next, "session state change");
        *self = next;
    }
}

/// Why a session left the active state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The remote end closed the connection
    RemoteClosed,
    /// A transport write failed for a reason other than the remote closing
    TransportFailed,
    /// The broker asked the session to tear down
    ForcedDisconnect,
    /// Too many consecutive writes exceeded the delivery timeout
    SlowConsumer,
    /// The broker dropped this listener or stopped running
    BrokerClosed,
}

/// Outcome of a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub listener: ListenerId,
    pub reason: EndReason,
}

/// Unregisters its listener when dropped, so every exit path unregisters once.
struct Registration {
    broker: Broker,
    listener: ListenerId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.broker.unregister(self.listener).is_err() {
            debug!(listener = %self.listener, "broker closed before unregister");
        }
    }
}

/// One streaming connection bound to a registered listener.
pub struct Session<T> {
    registration: Registration,
    transport: T,
    inbox: Inbox,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Accept a connection: check the transport can stream, then register a
    /// listener for it.
    pub fn open(broker: &Broker, transport: T) -> Result<Self> {
        let mut state = SessionState::Connecting;

        if !transport.supports_streaming() {
            warn!("rejecting connection: transport cannot stream");
            return Err(CrierError::StreamingUnsupported);
        }

        let inbox = broker.connect()?;
        let listener = inbox.id();
        state.advance(SessionState::Active, listener);
        info!(%listener, "session connected");

        Ok(Self {
            registration: Registration {
                broker: broker.clone(),
                listener,
            },
            transport,
            inbox,
            state,
        })
    }

    pub fn listener_id(&self) -> ListenerId {
        self.inbox.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream deliveries until the session ends, then tear down.
    ///
    /// Returns only after the listener has been unregistered and the
    /// transport released.
    pub async fn run(self) -> SessionEnd {
        let Session {
            registration,
            transport,
            inbox,
            mut state,
        } = self;
        let (listener, mut deliveries, mut disconnects) = inbox.into_parts();

        let config = registration.broker.config();
        let delivery_timeout = config.delivery_timeout;
        let max_timeouts = config.max_consecutive_timeouts;

        let mut pending_acks: Vec<DisconnectRequest> = Vec::new();
        let mut consecutive_timeouts = 0u32;

        let reason = loop {
            tokio::select! {
                biased;

                request = disconnects.recv() => match request {
                    Some(request) => {
                        pending_acks.push(request);
                        break EndReason::ForcedDisconnect;
                    }
                    None => break EndReason::BrokerClosed,
                },

                _ = transport.closed() => break EndReason::RemoteClosed,

                delivery = deliveries.recv() => {
                    let Some(delivery) = delivery else {
                        break EndReason::BrokerClosed;
                    };

                    match timeout(delivery_timeout, transport.send(&delivery)).await {
                        Ok(Ok(())) => consecutive_timeouts = 0,
                        Ok(Err(TransportError::Closed)) => break EndReason::RemoteClosed,
                        Ok(Err(e)) => {
                            warn!(%listener, event_id = %delivery.event_id, error = %e, "transport write failed");
                            break EndReason::TransportFailed;
                        }
                        Err(_) => {
                            consecutive_timeouts += 1;
                            warn!(
                                %listener,
                                event_id = %delivery.event_id,
                                consecutive_timeouts,
                                "delivery timed out; dropped"
                            );
                            if consecutive_timeouts >= max_timeouts {
                                break EndReason::SlowConsumer;
                            }
                        }
                    }
                }
            }
        };

        state.advance(SessionState::Disconnecting, listener);
        drop(registration);

        while let Ok(request) = disconnects.try_recv() {
            pending_acks.push(request);
        }
        drop(disconnects);
        drop(deliveries);
        drop(transport);

        state.advance(SessionState::Closed, listener);
        info!(%listener, ?reason, "session closed");

        for request in pending_acks {
            request.acknowledge();
        }

        SessionEnd { listener, reason }
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("listener", &self.inbox.id())
            .field("state", &self.state)
            .finish()
    }
}
