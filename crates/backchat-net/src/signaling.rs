//! WebSocket signaling manager with tokio mpsc command / broadcast event
//! pattern.
//!
//! The connection runs in a dedicated tokio task. Callers hand it envelopes
//! through a bounded command queue (never blocking) and observe inbound
//! traffic through [`Subscription`]s. Reconnection with exponential backoff
//! happens entirely inside the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use backchat_shared::constants::{
    DEFAULT_EVENT_BUFFER, DEFAULT_OUTBOUND_QUEUE, DEFAULT_RECONNECT_INITIAL_MS,
    DEFAULT_RECONNECT_MAX_MS, DEFAULT_SIGNALING_URL,
};
use backchat_shared::protocol::Envelope;

use crate::channel::{
    ChannelError, ConnectionState, EventKind, SignalEvent, SignalingChannel, Subscription,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for spawning the signaling task.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// `ws://` or `wss://` endpoint of the signaling server.
    pub url: String,
    /// Delay before the first reconnect attempt.
    pub reconnect_initial: Duration,
    /// Upper bound for the doubling reconnect delay.
    pub reconnect_max: Duration,
    /// Capacity of the outbound envelope queue.
    pub outbound_queue: usize,
    /// Capacity of the inbound event broadcast.
    pub event_buffer: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIGNALING_URL.to_string(),
            reconnect_initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager handle
// ---------------------------------------------------------------------------

/// Commands sent *into* the signaling task.
#[derive(Debug)]
enum ChannelCommand {
    /// Write an already encoded envelope.
    Send(String),
    /// Close the socket and stop reconnecting.
    Shutdown,
}

enum PumpExit {
    Disconnected,
    Shutdown,
}

pub struct SignalingManager {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    events: broadcast::Sender<SignalEvent>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SignalingManager {
    /// Spawn the connection task on the current tokio runtime.
    pub fn spawn(config: SignalingConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let connected = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run(
            config,
            cmd_rx,
            events.clone(),
            connected.clone(),
        ));

        Self {
            cmd_tx,
            events,
            connected,
            task,
        }
    }

    /// Ask the task to close the socket and exit.
    pub fn shutdown(&self) {
        if self.cmd_tx.try_send(ChannelCommand::Shutdown).is_err() {
            self.task.abort();
        }
    }
}

impl Drop for SignalingManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SignalingChannel for SignalingManager {
    fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Unavailable);
        }

        let json = envelope.to_json()?;
        self.cmd_tx
            .try_send(ChannelCommand::Send(json))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })
    }

    fn subscribe(&self, kind: EventKind) -> Subscription {
        Subscription::new(kind, self.events.subscribe())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn notify_local(&self, event: SignalEvent) {
        trace!(kind = ?event.kind(), "Re-broadcasting local event");
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let (stream, response) = connect_async(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    debug!(status = ?response.status(), "Signaling handshake complete");
    Ok(stream)
}

fn set_state(
    connected: &AtomicBool,
    events: &broadcast::Sender<SignalEvent>,
    state: ConnectionState,
) {
    connected.store(state == ConnectionState::Connected, Ordering::Release);
    // No subscribers is fine.
    let _ = events.send(SignalEvent::Connection(state));
}

async fn run(
    config: SignalingConfig,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    events: broadcast::Sender<SignalEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut delay = config.reconnect_initial;

    loop {
        set_state(&connected, &events, ConnectionState::Connecting);
        info!(url = %config.url, "Connecting to signaling server");

        match connect(&config.url).await {
            Ok(stream) => {
                info!(url = %config.url, "Signaling channel connected");
                delay = config.reconnect_initial;
                set_state(&connected, &events, ConnectionState::Connected);

                let exit = pump(stream, &mut cmd_rx, &events).await;
                set_state(&connected, &events, ConnectionState::Disconnected);

                if let PumpExit::Shutdown = exit {
                    break;
                }
                warn!("Signaling connection lost");
            }
            Err(e) => {
                set_state(&connected, &events, ConnectionState::Disconnected);
                let detail = format!("{e:#}");
                warn!(error = %detail, "Signaling connect failed");
            }
        }

        let delay_ms = delay.as_millis() as u64;
        info!(delay_ms, "Reconnecting to signaling server");
        if !backoff(delay, &mut cmd_rx).await {
            break;
        }
        delay = (delay * 2).min(config.reconnect_max);
    }

    info!("Signaling task stopped");
}

/// Sleep for `delay` while draining the command queue. Envelopes queued while
/// the socket is down are dropped; their messages stay pending. Returns
/// `false` when a shutdown was requested.
async fn backoff(delay: Duration, cmd_rx: &mut mpsc::Receiver<ChannelCommand>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Send(_)) => {
                    warn!("Dropping envelope while disconnected");
                }
                Some(ChannelCommand::Shutdown) | None => return false,
            },
        }
    }
}

async fn pump(
    stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<ChannelCommand>,
    events: &broadcast::Sender<SignalEvent>,
) -> PumpExit {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ChannelCommand::Send(json)) => {
                    trace!(len = json.len(), "Writing envelope");
                    if let Err(e) = write.send(Frame::Text(json)).await {
                        warn!(error = %e, "Failed to write envelope");
                        return PumpExit::Disconnected;
                    }
                }
                Some(ChannelCommand::Shutdown) | None => {
                    let _ = write.send(Frame::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Frame::Text(text))) => dispatch_frame(&text, events),
                Some(Ok(Frame::Ping(data))) => {
                    if write.send(Frame::Pong(data)).await.is_err() {
                        return PumpExit::Disconnected;
                    }
                }
                Some(Ok(Frame::Close(frame))) => {
                    info!(frame = ?frame, "Signaling server closed the connection");
                    return PumpExit::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Signaling read error");
                    return PumpExit::Disconnected;
                }
                None => return PumpExit::Disconnected,
            },
        }
    }
}

fn dispatch_frame(text: &str, events: &broadcast::Sender<SignalEvent>) {
    match Envelope::from_json(text) {
        Ok(envelope) => {
            debug!(kind = envelope.type_name(), "Envelope received");
            let _ = events.send(SignalEvent::from(envelope));
        }
        Err(e) => {
            warn!(error = %e, len = text.len(), "Ignoring malformed signaling frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use backchat_shared::protocol::{ChatRecord, DeliveredPayload};
    use backchat_shared::{ClientMessageId, ConversationId, ConversationKind, MessageKind};
    use tokio::net::TcpListener;

    fn fast_config(url: String) -> SignalingConfig {
        SignalingConfig {
            url,
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(50),
            ..SignalingConfig::default()
        }
    }

    async fn wait_for(sub: &mut Subscription, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = sub.recv().await {
                if event == SignalEvent::Connection(state) {
                    return;
                }
            }
        })
        .await
        .expect("connection state not reached");
    }

    #[tokio::test]
    async fn send_fails_fast_while_disconnected() {
        // Reserve a port and release it so nothing is listening there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let manager = SignalingManager::spawn(fast_config(format!("ws://{addr}/ws")));
        let envelope = Envelope::invalidate(backchat_shared::InvalidationDomain::Chats);

        assert!(!manager.is_connected());
        assert!(matches!(
            manager.send(&envelope),
            Err(ChannelError::Unavailable)
        ));
        manager.shutdown();
    }

    #[tokio::test]
    async fn local_events_reach_subscribers_while_offline() {
        let manager = SignalingManager::spawn(fast_config("ws://127.0.0.1:9/ws".to_string()));
        let mut sub = manager.subscribe(EventKind::Invalidate);

        let event = SignalEvent::Invalidate(backchat_shared::InvalidationDomain::Friendship);
        manager.notify_local(event.clone());

        let seen = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap();
        assert_eq!(seen, Some(event));
        manager.shutdown();
    }

    #[tokio::test]
    async fn round_trips_envelopes_through_a_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let receipt = ClientMessageId::generate();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let frame = loop {
                match ws.next().await.unwrap().unwrap() {
                    Frame::Text(text) => break text,
                    _ => continue,
                }
            };

            let reply = Envelope::Delivered(DeliveredPayload {
                client_generated_uuids: vec![receipt],
            });
            ws.send(Frame::Text(reply.to_json().unwrap())).await.unwrap();
            frame
        });

        let manager = SignalingManager::spawn(fast_config(format!("ws://{addr}/ws")));
        let mut state = manager.subscribe(EventKind::Connection);
        let mut receipts = manager.subscribe(EventKind::Delivered);
        wait_for(&mut state, ConnectionState::Connected).await;

        let outbound = Envelope::chat_message(
            ConversationKind::Individual,
            ConversationId::new("conv1"),
            ChatRecord::outbound(ClientMessageId::generate(), "hi", MessageKind::Text),
        );
        manager.send(&outbound).unwrap();

        let seen = server.await.unwrap();
        assert_eq!(Envelope::from_json(&seen).unwrap(), outbound);

        let event = tokio::time::timeout(Duration::from_secs(5), receipts.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SignalEvent::Delivered(vec![receipt])));

        manager.shutdown();
    }
}
