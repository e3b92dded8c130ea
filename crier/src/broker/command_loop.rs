//! The command loop: the only code that mutates membership, groups or history.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::BrokerConfig;
use crate::error::SendError;
use crate::group::GroupRegistry;
use crate::history::{EventKind, History};
use crate::listener::{Delivery, Listener, ListenerId};

use super::command::{Command, Query};
use super::BrokerStats;

/// A registered listener as the loop sees it.
#[derive(Debug)]
struct Member {
    listener: Listener,
}

impl Member {
    fn new(listener: Listener) -> Self {
        Self { listener }
    }

    /// Queue a delivery. Returns `true` if the session is still there to take it.
    fn offer(&self, delivery: Delivery) -> bool {
        let event_id = delivery.event_id;
        match self.listener.send(delivery) {
            Ok(()) => true,
            Err(SendError::Closed) => {
                // Session is tearing down; its unregister is already on the way.
                debug!(listener = %self.listener.id(), %event_id, "skipped delivery to closed listener");
                false
            }
        }
    }
}

/// State owned exclusively by the command loop.
#[derive(Debug)]
pub(crate) struct BrokerCore {
    members: HashMap<ListenerId, Member>,
    groups: GroupRegistry,
    history: History,
}

impl BrokerCore {
    pub(crate) fn new(config: &BrokerConfig) -> Self {
        Self {
            members: HashMap::new(),
            groups: GroupRegistry::new(),
            history: History::new(config.history_size),
        }
    }

    /// Apply one command. Breaks once the broker has shut down.
    pub(crate) fn apply(&mut self, command: Command) -> ControlFlow<()> {
        trace!(command = command.name(), "applying command");

        match command {
            Command::Register(listener) => self.register(listener),
            Command::Unregister(id) => self.unregister(id),
            Command::Broadcast { message } => self.broadcast(message),
            Command::Publish { group, message } => self.publish(&group, message),
            Command::Whisper { target, message } => self.whisper(target, message),
            Command::JoinGroup { group, listener } => self.join_group(&group, listener),
            Command::LeaveGroup { group, listener } => self.leave_group(&group, listener),
            Command::Disconnect { listener, ack } => self.disconnect(listener, ack),
            Command::Query(query) => self.answer(query),
            Command::Shutdown { teardowns } => {
                self.shutdown(teardowns);
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    fn register(&mut self, listener: Listener) {
        let id = listener.id();
        if self.members.insert(id, Member::new(listener)).is_some() {
            warn!(listener = %id, "listener registered twice; replaced previous handle");
        } else {
            debug!(listener = %id, listeners = self.members.len(), "registered listener");
        }
    }

    fn unregister(&mut self, id: ListenerId) {
        if self.members.remove(&id).is_none() {
            debug!(listener = %id, "unregister for unknown listener ignored");
            return;
        }

        let left = self.groups.leave_all(id);
        debug!(
            listener = %id,
            groups_left = left.len(),
            listeners = self.members.len(),
            "unregistered listener"
        );
    }

    fn broadcast(&mut self, message: Arc<str>) {
        let event_id = self.history.record_broadcast(Arc::clone(&message));
        let delivery = Delivery {
            event_id,
            kind: EventKind::Broadcast,
            message,
        };

        let mut recipients = 0usize;
        for member in self.members.values() {
            if member.offer(delivery.clone()) {
                recipients += 1;
            }
        }

        debug!(%event_id, recipients, "broadcast event");
    }

    fn publish(&mut self, group: &str, message: Arc<str>) {
        let Some(group_members) = self.groups.members_of(group) else {
            debug!(group, "publish to unknown group skipped");
            return;
        };

        let event_id = self.history.record_publish(Arc::clone(&message), group);
        let delivery = Delivery {
            event_id,
            kind: EventKind::Publish,
            message,
        };

        let mut recipients = 0usize;
        for id in group_members {
            if let Some(member) = self.members.get(id) {
                if member.offer(delivery.clone()) {
                    recipients += 1;
                }
            }
        }

        debug!(%event_id, group, recipients, "published event");
    }

    fn whisper(&mut self, target: ListenerId, message: Arc<str>) {
        let event_id = self.history.record_whisper(Arc::clone(&message), target);

        let Some(member) = self.members.get(&target) else {
            debug!(%event_id, listener = %target, "whisper target not registered; delivery skipped");
            return;
        };

        let delivery = Delivery {
            event_id,
            kind: EventKind::Whisper,
            message,
        };
        let delivered = member.offer(delivery);
        debug!(%event_id, listener = %target, delivered, "whispered event");
    }

    fn join_group(&mut self, group: &str, listener: ListenerId) {
        if !self.members.contains_key(&listener) {
            warn!(group, listener = %listener, "join for unregistered listener ignored");
            return;
        }

        if self.groups.join(group, listener) {
            debug!(group, listener = %listener, "listener joined group");
        }
    }

    fn leave_group(&mut self, group: &str, listener: ListenerId) {
        if self.groups.leave(group, listener) {
            debug!(group, listener = %listener, "listener left group");
        }
    }

    fn disconnect(&mut self, id: ListenerId, ack: oneshot::Sender<()>) {
        match self.members.get(&id) {
            Some(member) => {
                if member.listener.request_disconnect(Some(ack)) {
                    info!(listener = %id, "forced disconnect requested");
                } else {
                    debug!(listener = %id, "forced disconnect for finished session");
                }
            }
            None => debug!(listener = %id, "forced disconnect for unknown listener ignored"),
        }
    }

    fn answer(&self, query: Query) {
        // Receivers may have given up waiting; a dropped reply is fine.
        match query {
            Query::Listeners(reply) => {
                let _ = reply.send(self.members.keys().copied().collect());
            }
            Query::IsRegistered(id, reply) => {
                let _ = reply.send(self.members.contains_key(&id));
            }
            Query::Groups(reply) => {
                let _ = reply.send(self.groups.group_names().map(str::to_string).collect());
            }
            Query::GroupExists(group, reply) => {
                let _ = reply.send(self.groups.exists(&group));
            }
            Query::GroupMembers(group, reply) => {
                let members = self
                    .groups
                    .members_of(&group)
                    .map(|members| members.iter().copied().collect());
                let _ = reply.send(members);
            }
            Query::Event(id, reply) => {
                let _ = reply.send(self.history.get(id).cloned());
            }
            Query::RecentEvents(n, reply) => {
                let _ = reply.send(self.history.recent(n).cloned().collect());
            }
            Query::Stats(reply) => {
                let _ = reply.send(BrokerStats {
                    listeners: self.members.len(),
                    groups: self.groups.len(),
                    history_len: self.history.len(),
                    history_capacity: self.history.capacity(),
                    last_event_id: self.history.last_id(),
                });
            }
        }
    }

    fn shutdown(&mut self, teardowns: oneshot::Sender<Vec<oneshot::Receiver<()>>>) {
        let mut pending = Vec::with_capacity(self.members.len());
        for member in self.members.values() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if member.listener.request_disconnect(Some(ack_tx)) {
                pending.push(ack_rx);
            }
        }

        info!(
            listeners = self.members.len(),
            sessions = pending.len(),
            "broker shutting down"
        );

        self.members.clear();
        self.groups.clear();
        let _ = teardowns.send(pending);
    }
}

/// Drain the command queue until shutdown or until every broker handle is gone.
pub(crate) async fn run_command_loop(
    mut core: BrokerCore,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    info!("Broker command loop started");

    while let Some(command) = commands.recv().await {
        if core.apply(command).is_break() {
            break;
        }
    }

    info!("Broker command loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{EventId, EventTarget};
    use crate::listener::{self, Inbox};

    fn core() -> BrokerCore {
        BrokerCore::new(&BrokerConfig::default())
    }

    fn connect(core: &mut BrokerCore, id: u64) -> Inbox {
        let (listener, inbox) = listener::channel(ListenerId::new(id));
        assert!(core.apply(Command::Register(listener)).is_continue());
        inbox
    }

    fn messages(inbox: &mut Inbox) -> Vec<String> {
        std::iter::from_fn(|| inbox.try_recv())
            .map(|d| d.message.to_string())
            .collect()
    }

    #[test]
    fn test_broadcast_reaches_every_member() {
        let mut core = core();
        let mut a = connect(&mut core, 1);
        let mut b = connect(&mut core, 2);

        core.apply(Command::Broadcast {
            message: Arc::from("hello"),
        });

        assert_eq!(messages(&mut a), vec!["hello"]);
        assert_eq!(messages(&mut b), vec!["hello"]);

        let event = core.history.get(EventId::new(1)).unwrap();
        assert_eq!(event.kind, EventKind::Broadcast);
        assert_eq!(event.target, EventTarget::Everyone);
    }

    #[test]
    fn test_publish_to_unknown_group_records_nothing() {
        let mut core = core();
        let mut a = connect(&mut core, 1);

        core.apply(Command::Publish {
            group: "nobody".to_string(),
            message: Arc::from("lost"),
        });

        assert!(messages(&mut a).is_empty());
        assert!(core.history.is_empty());
    }

    #[test]
    fn test_whisper_to_unknown_listener_is_still_recorded() {
        let mut core = core();

        core.apply(Command::Whisper {
            target: ListenerId::new(9),
            message: Arc::from("anyone?"),
        });

        let event = core.history.get(EventId::new(1)).unwrap();
        assert_eq!(event.kind, EventKind::Whisper);
        assert_eq!(event.target, EventTarget::Listener(ListenerId::new(9)));
    }

    #[test]
    fn test_join_requires_registration() {
        let mut core = core();
        core.apply(Command::JoinGroup {
            group: "g".to_string(),
            listener: ListenerId::new(5),
        });
        assert!(!core.groups.exists("g"));
    }

    #[test]
    fn test_unregister_twice_is_absorbed() {
        let mut core = core();
        let _inbox = connect(&mut core, 1);
        core.apply(Command::JoinGroup {
            group: "g".to_string(),
            listener: ListenerId::new(1),
        });

        assert!(core.apply(Command::Unregister(ListenerId::new(1))).is_continue());
        assert!(core.apply(Command::Unregister(ListenerId::new(1))).is_continue());
        assert!(core.members.is_empty());
        assert!(!core.groups.exists("g"));
    }

    #[test]
    fn test_burst_reaches_listener_that_has_not_drained() {
        let mut core = core();
        let mut idle = connect(&mut core, 1);
        let mut other = connect(&mut core, 2);

        for n in 0..500 {
            core.apply(Command::Broadcast {
                message: Arc::from(format!("m{n}")),
            });
        }

        let expected: Vec<_> = (0..500).map(|n| format!("m{n}")).collect();
        assert_eq!(messages(&mut idle), expected);
        assert_eq!(messages(&mut other), expected);
        assert!(idle.drain_disconnect_requests().is_empty());
    }

    #[test]
    fn test_delivery_to_closed_listener_is_skipped() {
        let mut core = core();
        drop(connect(&mut core, 1));
        let mut alive = connect(&mut core, 2);

        core.apply(Command::Broadcast {
            message: Arc::from("still here"),
        });

        assert_eq!(messages(&mut alive), vec!["still here"]);
        assert_eq!(core.members.len(), 2);
        assert_eq!(core.history.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_requests_teardown_and_breaks() {
        let mut core = core();
        let mut a = connect(&mut core, 1);
        let (tx, rx) = oneshot::channel();

        assert!(core.apply(Command::Shutdown { teardowns: tx }).is_break());

        let pending = rx.await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(core.members.is_empty());

        let request = a.disconnect_requested().await.unwrap();
        request.acknowledge();
        for ack in pending {
            assert!(ack.await.is_ok());
        }
    }
}
