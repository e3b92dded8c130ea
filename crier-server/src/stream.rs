//! Server-sent events endpoint.
//!
//! Each `GET /events` request becomes one [`Session`]. The session writes
//! deliveries into a small frame queue; the response body drains that queue
//! as SSE frames. When the client goes away hyper drops the body, the queue
//! closes, and the session sees the remote end as closed.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use crier::{Broker, Delivery, ListenerId, Session, Transport, TransportError};
use futures::{future, stream, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use warp::sse::Event as SseEvent;
use warp::{Rejection, Reply};

use crate::api::reject_broker_error;

/// Frames buffered between the session and the response body.
const FRAME_BUFFER: usize = 16;

pub const LISTENER_HEADER: &str = "x-crier-listener";

/// Session transport backed by an SSE response body.
#[derive(Debug)]
pub struct SseTransport {
    frames: mpsc::Sender<Delivery>,
}

impl SseTransport {
    /// Create a transport and the receiving end the response body reads from.
    pub fn channel() -> (Self, mpsc::Receiver<Delivery>) {
        let (frames, rx) = mpsc::channel(FRAME_BUFFER);
        (Self { frames }, rx)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.frames
            .send(delivery.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn closed(&self) {
        self.frames.closed().await
    }
}

/// Render one delivery as an SSE frame.
pub fn delivery_frame(delivery: &Delivery) -> SseEvent {
    SseEvent::default()
        .id(delivery.event_id.to_string())
        .event(delivery.kind.as_str())
        .data(&*delivery.message)
}

/// First frame of every stream, telling the client its listener id.
pub fn greeting_frame(listener: ListenerId) -> SseEvent {
    SseEvent::default()
        .event("listener")
        .data(listener.as_u64().to_string())
}

fn event_stream(
    listener: ListenerId,
    frames: mpsc::Receiver<Delivery>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static {
    let greeting = stream::once(future::ready(greeting_frame(listener)));
    let deliveries = stream::unfold(frames, |mut frames| async move {
        let delivery = frames.recv().await?;
        Some((delivery_frame(&delivery), frames))
    });

    greeting.chain(deliveries).map(Ok)
}

/// Handler for `GET /events`.
pub async fn subscribe(broker: Broker, keep_alive: Duration) -> Result<impl Reply, Rejection> {
    let (transport, frames) = SseTransport::channel();
    let session = Session::open(&broker, transport).map_err(reject_broker_error)?;
    let listener = session.listener_id();

    tokio::spawn(async move {
        let end = session.run().await;
        debug!(listener = %end.listener, reason = ?end.reason, "event stream finished");
    });

    let body = warp::sse::keep_alive()
        .interval(keep_alive)
        .stream(event_stream(listener, frames));

    let reply = warp::sse::reply(body);
    let reply = warp::reply::with_header(reply, "connection", "keep-alive");
    Ok(warp::reply::with_header(
        reply,
        LISTENER_HEADER,
        listener.as_u64().to_string(),
    ))
}
