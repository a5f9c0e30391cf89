//! The signaling channel contract shared by every transport.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use backchat_shared::protocol::{ChatPayload, Envelope};
use backchat_shared::{ClientMessageId, InvalidationDomain, ProtocolError};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Signaling channel is not connected")]
    Unavailable,

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("Signaling channel has shut down")]
    Closed,

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// A local cache domain is stale and should be refreshed.
    Invalidate(InvalidationDomain),
    /// Chat messages from the remote system, including echoes of our own.
    ChatMessages(ChatPayload),
    /// Delivery was corroborated for these messages.
    Delivered(Vec<ClientMessageId>),
    Connection(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Invalidate,
    ChatMessages,
    Delivered,
    Connection,
    All,
}

impl SignalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Invalidate(_) => EventKind::Invalidate,
            Self::ChatMessages(_) => EventKind::ChatMessages,
            Self::Delivered(_) => EventKind::Delivered,
            Self::Connection(_) => EventKind::Connection,
        }
    }
}

impl From<Envelope> for SignalEvent {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::ChatMessage(payload) => Self::ChatMessages(payload),
            Envelope::Delivered(payload) => Self::Delivered(payload.client_generated_uuids),
            Envelope::Invalidate(payload) => Self::Invalidate(payload.domain),
        }
    }
}

impl EventKind {
    pub fn matches(&self, event: &SignalEvent) -> bool {
        *self == EventKind::All || *self == event.kind()
    }
}

/// A filtered view over the channel's event stream.
pub struct Subscription {
    kind: EventKind,
    rx: broadcast::Receiver<SignalEvent>,
}

impl Subscription {
    pub fn new(kind: EventKind, rx: broadcast::Receiver<SignalEvent>) -> Self {
        Self { kind, rx }
    }

    /// Wait for the next matching event. Returns `None` once the channel has
    /// shut down.
    pub async fn recv(&mut self) -> Option<SignalEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.kind.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, kind = ?self.kind, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SignalEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.kind.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, kind = ?self.kind, "Subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Long-lived bidirectional transport.
///
/// `send` never waits on the network: it either hands the envelope to the
/// transport or reports why it could not. Reconnection and backoff belong to
/// the implementation, never to callers.
pub trait SignalingChannel: Send + Sync {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError>;

    fn subscribe(&self, kind: EventKind) -> Subscription;

    fn is_connected(&self) -> bool;

    /// Deliver a locally originated event to every subscriber, as if the
    /// remote side had sent it.
    fn notify_local(&self, event: SignalEvent);
}
