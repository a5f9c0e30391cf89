//! Local change notifications for the presentation layer.
//!
//! Views hold a [`broadcast::Receiver`] and re-read the stores when an event
//! names data they display. Events carry no payload beyond what is needed to
//! decide whether to refresh.

use tokio::sync::broadcast;
use tracing::trace;

use backchat_net::ConnectionState;
use backchat_shared::{ConversationId, ConversationKind, InvalidationDomain};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The conversation list changed (new conversation, new preview).
    ConversationsChanged,
    /// The history of one conversation changed.
    MessagesChanged(ConversationKind, ConversationId),
    /// The remote side declared a domain stale; refetch it from the data layer.
    Invalidated(InvalidationDomain),
    ConnectionChanged(ConnectionState),
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationsChanged => "conversations-changed",
            Self::MessagesChanged(..) => "messages-changed",
            Self::Invalidated(_) => "invalidated",
            Self::ConnectionChanged(_) => "connection-changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StoreEvent) {
        trace!(event = event.name(), "Publishing store event");
        // Nobody listening is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(backchat_shared::constants::DEFAULT_EVENT_BUFFER)
    }
}
