//! # backchat
//!
//! Line-oriented chat client for manual testing against a signaling server.
//!
//! ```text
//! /dm <room> <user> <text>   message a user, opening the conversation if new
//! /group <room> <text>       message a collection
//! /inbox                     list conversations, newest first
//! /history <dm|group> <room> show the cached history of a conversation
//! /quit
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use backchat_client::{
    init_tracing, spawn_session, ChatSession, ClientConfig, EventBus, SendRequest, SessionHandle,
    StoreBackend, StoreEvent,
};
use backchat_net::{SignalingChannel, SignalingManager};
use backchat_shared::{ConversationId, ConversationKind, UserId};
use backchat_store::{Database, LocalState, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting backchat v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    if config.user_id.as_str().is_empty() {
        warn!("BACKCHAT_USER_ID is not set, outgoing messages will carry an empty sender");
    }

    let manager = Arc::new(SignalingManager::spawn(config.signaling()));

    match &config.store {
        StoreBackend::Memory => run(&config, MemoryStore::new(), manager.clone()).await?,
        StoreBackend::Default => {
            let db = Database::new().context("Failed to open local database")?;
            run(&config, db, manager.clone()).await?
        }
        StoreBackend::Path(path) => {
            let db = Database::open_at(path)
                .with_context(|| format!("Failed to open database at {}", path.display()))?;
            run(&config, db, manager.clone()).await?
        }
    }

    manager.shutdown();
    info!("Goodbye");
    Ok(())
}

async fn run<S>(
    config: &ClientConfig,
    state: S,
    channel: Arc<SignalingManager>,
) -> anyhow::Result<()>
where
    S: LocalState + Send + 'static,
{
    let channel: Arc<dyn SignalingChannel> = channel;
    let session = ChatSession::new(
        config.user_id.clone(),
        state,
        channel.clone(),
        EventBus::new(config.event_buffer),
    );
    let (handle, task) = spawn_session(session, channel);

    let printer = tokio::spawn(print_events(handle.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = dispatch(&handle, line).await {
            println!("error: {e:#}");
        }
    }

    handle.shutdown().await;
    printer.abort();
    task.await.context("Session task panicked")?;
    Ok(())
}

async fn dispatch(handle: &SessionHandle, line: &str) -> anyhow::Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

    match command {
        "/dm" => {
            let mut parts = rest.splitn(3, ' ');
            let (Some(room), Some(user), Some(text)) = (parts.next(), parts.next(), parts.next())
            else {
                anyhow::bail!("usage: /dm <room> <user> <text>");
            };
            let message = handle
                .send(SendRequest::individual(
                    room,
                    text,
                    Some(UserId::new(user)),
                    None,
                ))
                .await?;
            println!("queued {}", message.client_id);
        }
        "/group" => {
            let Some((room, text)) = rest.split_once(' ') else {
                anyhow::bail!("usage: /group <room> <text>");
            };
            let message = handle.send(SendRequest::collection(room, text)).await?;
            println!("queued {}", message.client_id);
        }
        "/inbox" => {
            for entry in handle.inbox().await? {
                let when = entry
                    .last_activity
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:<12} {:<20} {}  {}",
                    entry.kind,
                    entry.id,
                    entry.title,
                    when,
                    entry.preview.unwrap_or_default()
                );
            }
        }
        "/history" => {
            let (kind, room) = match rest.split_once(' ') {
                Some(("dm", room)) if !room.trim().is_empty() => {
                    (ConversationKind::Individual, room.trim())
                }
                Some(("group", room)) if !room.trim().is_empty() => {
                    (ConversationKind::Collection, room.trim())
                }
                _ => anyhow::bail!("usage: /history <dm|group> <room>"),
            };
            for message in handle.messages(kind, ConversationId::new(room)).await? {
                let status = if message.delivered { "delivered" } else { "pending" };
                println!(
                    "{} {:<8} [{}] {}",
                    message.created_at.to_rfc3339(),
                    message.sender_id.short(),
                    status,
                    message.text
                );
            }
        }
        other => anyhow::bail!("unknown command {other}"),
    }
    Ok(())
}

async fn print_events(handle: SessionHandle) {
    let mut events = handle.subscribe();
    loop {
        match events.recv().await {
            Ok(StoreEvent::ConnectionChanged(state)) => println!("* connection {state:?}"),
            Ok(StoreEvent::Invalidated(domain)) => println!("* {domain:?} is stale"),
            Ok(event) => tracing::debug!(event = event.name(), "Store event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event printer lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}
