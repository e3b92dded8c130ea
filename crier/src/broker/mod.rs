//! The broker: a cloneable handle onto a single serialized command loop.
//!
//! Every mutation of membership, groups and history is submitted as a
//! command over one unbounded queue and applied by a single task, so
//! commands from the same caller are applied in submission order and no two
//! commands are ever applied concurrently.
//!
//! Submission never waits for processing. Only queries and the forced
//! disconnect handshake wait for a reply from the loop.

mod command;
mod command_loop;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::error::{CrierError, Result};
use crate::history::{Event, EventId};
use crate::listener::{self, Inbox, Listener, ListenerId};

use self::command::{Command, Query};
use self::command_loop::{run_command_loop, BrokerCore};

/// Point-in-time counters describing broker state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub listeners: usize,
    pub groups: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    pub last_event_id: Option<EventId>,
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    next_listener_id: AtomicU64,
    config: BrokerConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running broker.
///
/// Cloning is cheap; all clones feed the same command loop.
///
/// # Example
///
/// ```no_run
/// use crier::{Broker, BrokerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> crier::Result<()> {
/// let broker = Broker::start(BrokerConfig::default().with_history_size(50))?;
///
/// let mut inbox = broker.connect()?;
/// broker.join_group("ops", inbox.id())?;
/// broker.publish("deploy finished", "ops")?;
///
/// let delivery = inbox.recv().await.expect("broker is running");
/// assert_eq!(&*delivery.message, "deploy finished");
///
/// broker.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    /// Validate `config` and spawn the command loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_command_loop(BrokerCore::new(&config), command_rx));

        info!(
            history_size = config.history_size,
            delivery_timeout_ms = config.delivery_timeout.as_millis() as u64,
            "Broker started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                commands,
                next_listener_id: AtomicU64::new(1),
                config,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Whether the command loop has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }

    /// Allocate a fresh listener identity.
    pub fn next_listener_id(&self) -> ListenerId {
        ListenerId::new(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a listener, register it, and return its session-side half.
    pub fn connect(&self) -> Result<Inbox> {
        let (listener, inbox) = listener::channel(self.next_listener_id());
        self.register(listener)?;
        Ok(inbox)
    }

    pub fn register(&self, listener: Listener) -> Result<()> {
        self.submit(Command::Register(listener))
    }

    /// Remove a listener from membership and every group. Unknown ids are ignored.
    pub fn unregister(&self, listener: ListenerId) -> Result<()> {
        self.submit(Command::Unregister(listener))
    }

    /// Record a broadcast and deliver it to every registered listener.
    pub fn broadcast(&self, message: impl Into<Arc<str>>) -> Result<()> {
        self.submit(Command::Broadcast {
            message: message.into(),
        })
    }

    /// Record and deliver to every member of `group`.
    ///
    /// Publishing to a group that does not exist is neither delivered nor recorded.
    pub fn publish(&self, message: impl Into<Arc<str>>, group: impl Into<String>) -> Result<()> {
        self.submit(Command::Publish {
            group: group.into(),
            message: message.into(),
        })
    }

    /// Record and deliver to a single listener.
    ///
    /// The event is recorded even when `target` is not registered.
    pub fn whisper(&self, message: impl Into<Arc<str>>, target: ListenerId) -> Result<()> {
        self.submit(Command::Whisper {
            target,
            message: message.into(),
        })
    }

    pub fn join_group(&self, group: impl Into<String>, listener: ListenerId) -> Result<()> {
        self.submit(Command::JoinGroup {
            group: group.into(),
            listener,
        })
    }

    pub fn leave_group(&self, group: impl Into<String>, listener: ListenerId) -> Result<()> {
        self.submit(Command::LeaveGroup {
            group: group.into(),
            listener,
        })
    }

    /// Force a listener's session to tear down and wait until it confirms.
    ///
    /// Returns `true` once a live session has acknowledged teardown, `false`
    /// if the listener was not registered or its session was already gone.
    pub async fn disconnect(&self, listener: ListenerId) -> Result<bool> {
        let (ack, confirmed) = oneshot::channel();
        self.submit(Command::Disconnect { listener, ack })?;
        Ok(confirmed.await.is_ok())
    }

    /// Stop accepting commands, disconnect every listener and wait for the
    /// loop to finish. Calling this more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        let (teardowns, pending) = oneshot::channel();
        if self.submit(Command::Shutdown { teardowns }).is_ok() {
            if let Ok(pending) = pending.await {
                let sessions = pending.len();
                let timeout = self.inner.config.shutdown_timeout;
                match tokio::time::timeout(timeout, join_all(pending)).await {
                    Ok(_) => info!(sessions, "all sessions torn down"),
                    Err(_) => warn!(sessions, ?timeout, "timed out waiting for sessions to tear down"),
                }
            }
        }

        let worker = self.inner.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Broker command loop ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    pub async fn listeners(&self) -> Result<Vec<ListenerId>> {
        self.ask(Query::Listeners).await
    }

    pub async fn is_registered(&self, listener: ListenerId) -> Result<bool> {
        self.ask(|reply| Query::IsRegistered(listener, reply)).await
    }

    pub async fn groups(&self) -> Result<Vec<String>> {
        self.ask(Query::Groups).await
    }

    pub async fn group_exists(&self, group: impl Into<String>) -> Result<bool> {
        let group = group.into();
        self.ask(|reply| Query::GroupExists(group, reply)).await
    }

    /// Members of `group`, or `None` if it does not exist.
    pub async fn group_members(&self, group: impl Into<String>) -> Result<Option<Vec<ListenerId>>> {
        let group = group.into();
        self.ask(|reply| Query::GroupMembers(group, reply)).await
    }

    /// A retained history event; `None` if never recorded or already evicted.
    pub async fn event(&self, id: EventId) -> Result<Option<Event>> {
        self.ask(|reply| Query::Event(id, reply)).await
    }

    /// The `n` most recent history events, oldest first.
    pub async fn recent_events(&self, n: usize) -> Result<Vec<Event>> {
        self.ask(|reply| Query::RecentEvents(n, reply)).await
    }

    pub async fn stats(&self) -> Result<BrokerStats> {
        self.ask(Query::Stats).await
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| CrierError::BrokerClosed)
    }

    async fn ask<T>(&self, query: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T> {
        let (reply, answer) = oneshot::channel();
        self.submit(Command::Query(query(reply)))?;
        answer.await.map_err(|_| CrierError::BrokerClosed)
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}
