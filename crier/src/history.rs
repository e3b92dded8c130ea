//! Bounded audit trail of distribution commands.
//!
//! The history log keeps the most recent `capacity` events. Ids are assigned
//! on append, start at 1 and are never reused; once the log is full the
//! event with the smallest id is evicted to make room.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::listener::ListenerId;

/// Monotonically increasing identifier of a history event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Create an EventId with the given value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which distribution command produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Broadcast,
    Publish,
    Whisper,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Broadcast => "broadcast",
            EventKind::Publish => "publish",
            EventKind::Whisper => "whisper",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recipient of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTarget {
    /// Every registered listener
    Everyone,
    /// Members of a named group
    Group(String),
    /// A single listener
    Listener(ListenerId),
}

/// An immutable history record
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pub message: Arc<str>,
    pub target: EventTarget,
    pub recorded_at: DateTime<Utc>,
}

/// Fixed-capacity log of the most recent events, ordered by id.
#[derive(Debug)]
pub struct History {
    capacity: usize,
    events: VecDeque<Event>,
    last_id: u64,
}

impl History {
    /// Create an empty history retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            last_id: 0,
        }
    }

    pub fn record_broadcast(&mut self, message: Arc<str>) -> EventId {
        self.append(EventKind::Broadcast, message, EventTarget::Everyone)
    }

    pub fn record_publish(&mut self, message: Arc<str>, group: &str) -> EventId {
        self.append(
            EventKind::Publish,
            message,
            EventTarget::Group(group.to_string()),
        )
    }

    pub fn record_whisper(&mut self, message: Arc<str>, listener: ListenerId) -> EventId {
        self.append(EventKind::Whisper, message, EventTarget::Listener(listener))
    }

    /// Append an event under the next id, evicting the oldest when over capacity.
    pub fn append(&mut self, kind: EventKind, message: Arc<str>, target: EventTarget) -> EventId {
        self.last_id += 1;
        let id = EventId(self.last_id);

        self.events.push_back(Event {
            id,
            kind,
            message,
            target,
            recorded_at: Utc::now(),
        });

        while self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                tracing::trace!(event_id = %evicted.id, "evicted history event");
            }
        }

        id
    }

    /// Look up a retained event by id.
    pub fn get(&self, id: EventId) -> Option<&Event> {
        // Retained ids are contiguous, so the offset from the oldest is the index.
        let oldest = self.events.front()?.id.0;
        let index = id.0.checked_sub(oldest)?;
        self.events.get(usize::try_from(index).ok()?)
    }

    /// The `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Event> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip)
    }

    /// Id of the most recently appended event, if any.
    pub fn last_id(&self) -> Option<EventId> {
        (self.last_id > 0).then_some(EventId(self.last_id))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
