//! Concurrent submission against a single broker.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use crier::{Broker, BrokerConfig, Delivery, EndReason, Session, Transport, TransportError};
use futures::future::join_all;
use tokio::sync::mpsc;

/// A transport that keeps up: every write lands in an unbounded channel.
struct Recording {
    frames: mpsc::UnboundedSender<Delivery>,
}

fn recording() -> (Recording, mpsc::UnboundedReceiver<Delivery>) {
    let (frames, rx) = mpsc::unbounded_channel();
    (Recording { frames }, rx)
}

#[async_trait]
impl Transport for Recording {
    async fn send(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.frames
            .send(delivery.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn closed(&self) {
        self.frames.closed().await
    }
}

/// Collect exactly `count` frames, failing if any is slow to arrive.
async fn collect(frames: &mut mpsc::UnboundedReceiver<Delivery>, count: usize) -> Vec<Delivery> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        let delivery = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("deliveries keep flowing")
            .expect("session is running");
        received.push(delivery);
    }
    received
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcasts_reach_every_listener_once() {
    const LISTENERS: usize = 50;
    const BROADCASTS: usize = 100;

    let config = BrokerConfig::default().with_history_size(BROADCASTS);
    let broker = Broker::start(config).unwrap();

    let inboxes: Vec<_> = (0..LISTENERS).map(|_| broker.connect().unwrap()).collect();

    let senders = (0..BROADCASTS).map(|n| {
        let broker = broker.clone();
        tokio::spawn(async move { broker.broadcast(format!("msg-{n}")) })
    });
    for result in join_all(senders).await {
        result.unwrap().unwrap();
    }

    let stats = broker.stats().await.unwrap();
    assert_eq!(stats.history_len, BROADCASTS);
    assert_eq!(stats.last_event_id.map(|id| id.as_u64()), Some(BROADCASTS as u64));

    let expected: HashSet<String> = (0..BROADCASTS).map(|n| format!("msg-{n}")).collect();
    for mut inbox in inboxes {
        let mut seen = HashSet::new();
        let mut last_id = 0;
        while let Some(delivery) = inbox.try_recv() {
            // Every listener observes events in history order.
            assert!(delivery.event_id.as_u64() > last_id);
            last_id = delivery.event_id.as_u64();
            assert!(seen.insert(delivery.message.to_string()), "duplicate delivery");
        }
        assert_eq!(seen, expected, "{} missed messages", inbox.id());
    }

    broker.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_sessions_receive_every_concurrent_broadcast() {
    const SESSIONS: usize = 50;
    const BROADCASTS: usize = 100;

    let broker = Broker::start(BrokerConfig::default()).unwrap();

    let mut running = Vec::with_capacity(SESSIONS);
    let mut outputs = Vec::with_capacity(SESSIONS);
    for _ in 0..SESSIONS {
        let (transport, frames) = recording();
        running.push(tokio::spawn(Session::open(&broker, transport).unwrap().run()));
        outputs.push(frames);
    }

    let senders = (0..BROADCASTS).map(|n| {
        let broker = broker.clone();
        tokio::spawn(async move { broker.broadcast(format!("msg-{n}")) })
    });
    for result in join_all(senders).await {
        result.unwrap().unwrap();
    }

    let expected: HashSet<String> = (0..BROADCASTS).map(|n| format!("msg-{n}")).collect();
    for frames in &mut outputs {
        let received = collect(frames, BROADCASTS).await;

        let ids: Vec<u64> = received.iter().map(|d| d.event_id.as_u64()).collect();
        assert_eq!(ids, (1..=BROADCASTS as u64).collect::<Vec<_>>());

        let messages: HashSet<String> = received.iter().map(|d| d.message.to_string()).collect();
        assert_eq!(messages, expected);
        assert!(frames.try_recv().is_err(), "no extra deliveries");
    }

    broker.shutdown().await.unwrap();
    for handle in running {
        assert_eq!(handle.await.unwrap().reason, EndReason::ForcedDisconnect);
    }
}

#[tokio::test]
async fn test_single_caller_burst_reaches_live_session() {
    const BROADCASTS: usize = 100;

    let broker = Broker::start(BrokerConfig::default()).unwrap();
    let (transport, mut frames) = recording();
    let session = Session::open(&broker, transport).unwrap();
    let id = session.listener_id();
    let running = tokio::spawn(session.run());

    for n in 0..BROADCASTS {
        broker.broadcast(format!("{n}")).unwrap();
    }

    let received = collect(&mut frames, BROADCASTS).await;
    let messages: Vec<usize> = received
        .iter()
        .map(|d| d.message.parse().unwrap())
        .collect();
    assert_eq!(messages, (0..BROADCASTS).collect::<Vec<_>>());
    assert!(broker.is_registered(id).await.unwrap());

    drop(frames);
    assert_eq!(running.await.unwrap().reason, EndReason::RemoteClosed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_get_distinct_ids() {
    let broker = Broker::start(BrokerConfig::default()).unwrap();

    let tasks = (0..64).map(|_| {
        let broker = broker.clone();
        tokio::spawn(async move { broker.connect().map(|inbox| inbox.id()) })
    });
    let ids: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let distinct: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len());

    // Inboxes were dropped, but nothing unregisters them without a session.
    assert_eq!(broker.listeners().await.unwrap().len(), ids.len());
}

#[tokio::test]
async fn test_queries_interleave_with_submissions() {
    let config = BrokerConfig::default().with_history_size(1000);
    let broker = Broker::start(config).unwrap();
    let mut inbox = broker.connect().unwrap();

    let writer = {
        let broker = broker.clone();
        tokio::spawn(async move {
            for n in 0..200 {
                broker.broadcast(format!("{n}")).unwrap();
                if n % 20 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut received = 0;
    while received < 200 {
        let delivery = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("deliveries keep flowing")
            .expect("broker is running");
        assert_eq!(delivery.message.parse::<usize>().unwrap(), received);
        received += 1;
    }

    writer.await.unwrap();
    assert_eq!(broker.stats().await.unwrap().history_len, 200);
}
