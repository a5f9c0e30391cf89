//! In-process signaling channel.
//!
//! Records every envelope it accepts instead of writing it to a socket, and
//! lets the owner inject inbound events and flip connectivity. Used for
//! offline sessions and as the transport in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use backchat_shared::constants::DEFAULT_EVENT_BUFFER;
use backchat_shared::protocol::Envelope;

use crate::channel::{
    ChannelError, ConnectionState, EventKind, SignalEvent, SignalingChannel, Subscription,
};

pub struct LoopbackChannel {
    sent: Mutex<Vec<Envelope>>,
    connected: AtomicBool,
    events: broadcast::Sender<SignalEvent>,
}

impl LoopbackChannel {
    /// A connected loopback channel.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_BUFFER);
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            events,
        }
    }

    /// A loopback channel that starts disconnected.
    pub fn disconnected() -> Self {
        let channel = Self::new();
        channel.connected.store(false, Ordering::Release);
        channel
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        let state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let _ = self.events.send(SignalEvent::Connection(state));
    }

    /// Deliver `event` to subscribers as if it arrived from the remote side.
    pub fn inject(&self, event: SignalEvent) {
        debug!(kind = ?event.kind(), "Injecting loopback event");
        let _ = self.events.send(event);
    }

    /// Envelopes accepted so far, in send order.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingChannel for LoopbackChannel {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Unavailable);
        }
        self.sent
            .lock()
            .map_err(|_| ChannelError::Closed)?
            .push(envelope.clone());
        Ok(())
    }

    fn subscribe(&self, kind: EventKind) -> Subscription {
        Subscription::new(kind, self.events.subscribe())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn notify_local(&self, event: SignalEvent) {
        self.inject(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchat_shared::InvalidationDomain;

    #[test]
    fn records_only_while_connected() {
        let channel = LoopbackChannel::disconnected();
        let envelope = Envelope::invalidate(InvalidationDomain::Friendship);

        assert!(matches!(
            channel.send(&envelope),
            Err(ChannelError::Unavailable)
        ));
        assert!(channel.sent().is_empty());

        channel.set_connected(true);
        channel.send(&envelope).unwrap();
        assert_eq!(channel.sent(), vec![envelope]);
    }

    #[test]
    fn injected_events_reach_subscribers() {
        let channel = LoopbackChannel::new();
        let mut sub = channel.subscribe(EventKind::Invalidate);

        channel.set_connected(false);
        channel.inject(SignalEvent::Invalidate(InvalidationDomain::Friendship));

        assert_eq!(
            sub.try_recv(),
            Some(SignalEvent::Invalidate(InvalidationDomain::Friendship))
        );
    }
}
