//! Listener handles and their session-side counterparts.
//!
//! A listener is split into two halves when a streaming connection is
//! accepted. The [`Listener`] half is handed to the broker and lets it push
//! deliveries and request a forced disconnect without ever blocking the
//! command loop. The [`Inbox`] half stays with the session adapter, which
//! drains deliveries onto its transport and watches for disconnect requests.
//!
//! The delivery queue between the two halves is unbounded, so a listener
//! that keeps up never loses a message to a burst. Stalled listeners are
//! bounded on the session side instead: consecutive write timeouts end the
//! session, which closes the queue.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::SendError;
use crate::history::{EventId, EventKind};

/// Opaque identity of a connected subscriber, stable for its connection's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Create a ListenerId with the given value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

impl FromStr for ListenerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("listener-").unwrap_or(s);
        raw.parse().map(Self)
    }
}

/// A message routed to one listener
#[derive(Debug, Clone)]
pub struct Delivery {
    /// History id of the event that produced this delivery
    pub event_id: EventId,
    pub kind: EventKind,
    /// Payload, shared between every recipient of the same event
    pub message: Arc<str>,
}

/// A forced-disconnect request, optionally carrying a teardown acknowledgement
#[derive(Debug)]
pub struct DisconnectRequest {
    ack: Option<oneshot::Sender<()>>,
}

impl DisconnectRequest {
    /// Confirm that the session has been torn down.
    pub fn acknowledge(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

/// Broker-side handle to one connected subscriber.
#[derive(Debug, Clone)]
pub struct Listener {
    id: ListenerId,
    deliveries: mpsc::UnboundedSender<Delivery>,
    disconnects: mpsc::UnboundedSender<DisconnectRequest>,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Queue a delivery for this listener without waiting.
    ///
    /// Fails with [`SendError::Closed`] once the session has gone away.
    pub fn send(&self, delivery: Delivery) -> Result<(), SendError> {
        self.deliveries.send(delivery).map_err(|_| SendError::Closed)
    }

    /// Ask the owning session to tear down.
    ///
    /// Returns `false` if the session has already finished, in which case the
    /// acknowledgement sender is dropped.
    pub fn request_disconnect(&self, ack: Option<oneshot::Sender<()>>) -> bool {
        self.disconnects.send(DisconnectRequest { ack }).is_ok()
    }

    /// Whether the owning session is still draining deliveries.
    pub fn is_connected(&self) -> bool {
        !self.deliveries.is_closed()
    }
}

/// Session-side half of a listener.
#[derive(Debug)]
pub struct Inbox {
    id: ListenerId,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    disconnects: mpsc::UnboundedReceiver<DisconnectRequest>,
}

impl Inbox {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next delivery. Returns `None` once the broker has dropped
    /// every handle to this listener.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Take a delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.deliveries.try_recv().ok()
    }

    /// Wait for a forced-disconnect request.
    pub async fn disconnect_requested(&mut self) -> Option<DisconnectRequest> {
        self.disconnects.recv().await
    }

    /// Take every disconnect request already queued.
    pub fn drain_disconnect_requests(&mut self) -> Vec<DisconnectRequest> {
        let mut pending = Vec::new();
        while let Ok(request) = self.disconnects.try_recv() {
            pending.push(request);
        }
        pending
    }

    /// Split into the raw receivers, for adapters that drive them directly.
    pub(crate) fn into_parts(
        self,
    ) -> (
        ListenerId,
        mpsc::UnboundedReceiver<Delivery>,
        mpsc::UnboundedReceiver<DisconnectRequest>,
    ) {
        (self.id, self.deliveries, self.disconnects)
    }
}

/// Create the two halves of a listener.
pub fn channel(id: ListenerId) -> (Listener, Inbox) {
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();

    (
        Listener {
            id,
            deliveries: delivery_tx,
            disconnects: disconnect_tx,
        },
        Inbox {
            id,
            deliveries: delivery_rx,
            disconnects: disconnect_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(id: u64, text: &str) -> Delivery {
        Delivery {
            event_id: EventId::new(id),
            kind: EventKind::Broadcast,
            message: Arc::from(text),
        }
    }

    #[test]
    fn test_listener_id_display_and_parse() {
        let id = ListenerId::new(42);
        assert_eq!(id.to_string(), "listener-42");
        assert_eq!("listener-42".parse::<ListenerId>().unwrap(), id);
        assert_eq!("42".parse::<ListenerId>().unwrap(), id);
        assert!("listener-x".parse::<ListenerId>().is_err());
    }

    #[tokio::test]
    async fn test_send_and_receive_in_order() {
        let (listener, mut inbox) = channel(ListenerId::new(1));
        assert_eq!(listener.id(), inbox.id());

        listener.send(delivery(1, "first")).unwrap();
        listener.send(delivery(2, "second")).unwrap();

        assert_eq!(&*inbox.recv().await.unwrap().message, "first");
        assert_eq!(&*inbox.recv().await.unwrap().message, "second");
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_burst_is_queued_in_full_and_in_order() {
        let (listener, mut inbox) = channel(ListenerId::new(1));
        for n in 1..=500 {
            listener.send(delivery(n, "burst")).unwrap();
        }

        let ids: Vec<u64> = std::iter::from_fn(|| inbox.try_recv())
            .map(|d| d.event_id.as_u64())
            .collect();
        assert_eq!(ids, (1..=500).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_reports_closed_inbox() {
        let (listener, inbox) = channel(ListenerId::new(1));
        assert!(listener.is_connected());
        drop(inbox);
        assert!(!listener.is_connected());
        assert_eq!(listener.send(delivery(1, "gone")), Err(SendError::Closed));
        assert!(!listener.request_disconnect(None));
    }

    #[tokio::test]
    async fn test_disconnect_request_acknowledgement() {
        let (listener, mut inbox) = channel(ListenerId::new(3));
        let (ack_tx, ack_rx) = oneshot::channel();

        assert!(listener.request_disconnect(Some(ack_tx)));
        assert!(listener.request_disconnect(None));

        let request = inbox.disconnect_requested().await.unwrap();
        let rest = inbox.drain_disconnect_requests();
        assert_eq!(rest.len(), 1);

        request.acknowledge();
        rest.into_iter().for_each(DisconnectRequest::acknowledge);
        assert!(ack_rx.await.is_ok());
    }
}
