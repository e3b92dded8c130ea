//! Commands accepted by the broker's command loop.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::history::{Event, EventId};
use crate::listener::{Listener, ListenerId};

use super::BrokerStats;

/// A unit of work applied by the command loop, one at a time, in queue order.
#[derive(Debug)]
pub(crate) enum Command {
    /// Add a listener to the membership set
    Register(Listener),
    /// Remove a listener from the membership set and from every group
    Unregister(ListenerId),
    /// Record and deliver to every registered listener
    Broadcast { message: Arc<str> },
    /// Record and deliver to the members of one group
    Publish { group: String, message: Arc<str> },
    /// Record and deliver to one listener
    Whisper { target: ListenerId, message: Arc<str> },
    /// Add a registered listener to a group
    JoinGroup { group: String, listener: ListenerId },
    /// Remove a listener from a group
    LeaveGroup { group: String, listener: ListenerId },
    /// Signal a listener's session to tear down; `ack` fires once it has
    Disconnect {
        listener: ListenerId,
        ack: oneshot::Sender<()>,
    },
    /// Read-only inspection of broker state
    Query(Query),
    /// Disconnect everyone and stop the loop
    Shutdown {
        teardowns: oneshot::Sender<Vec<oneshot::Receiver<()>>>,
    },
}

/// Read-only questions answered by the command loop.
#[derive(Debug)]
pub(crate) enum Query {
    Listeners(oneshot::Sender<Vec<ListenerId>>),
    IsRegistered(ListenerId, oneshot::Sender<bool>),
    Groups(oneshot::Sender<Vec<String>>),
    GroupExists(String, oneshot::Sender<bool>),
    GroupMembers(String, oneshot::Sender<Option<Vec<ListenerId>>>),
    Event(EventId, oneshot::Sender<Option<Event>>),
    RecentEvents(usize, oneshot::Sender<Vec<Event>>),
    Stats(oneshot::Sender<BrokerStats>),
}

impl Command {
    /// Short label used in logs.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Register(_) => "register",
            Command::Unregister(_) => "unregister",
            Command::Broadcast { .. } => "broadcast",
            Command::Publish { .. } => "publish",
            Command::Whisper { .. } => "whisper",
            Command::JoinGroup { .. } => "join_group",
            Command::LeaveGroup { .. } => "leave_group",
            Command::Disconnect { .. } => "disconnect",
            Command::Query(_) => "query",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_debug_and_name() {
        let cmd = Command::Publish {
            group: "g".to_string(),
            message: Arc::from("hi-g"),
        };
        assert!(format!("{:?}", cmd).contains("Publish"));
        assert_eq!(cmd.name(), "publish");
        assert_eq!(Command::Unregister(ListenerId::new(1)).name(), "unregister");
    }
}
