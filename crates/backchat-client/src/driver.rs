use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use backchat_net::{EventKind, SignalingChannel};
use backchat_shared::protocol::ChatRecord;
use backchat_shared::{ConversationId, ConversationKind};
use backchat_store::{Conversation, LocalState, Message, StoreError};

use crate::error::{SendError, SessionError};
use crate::events::{EventBus, StoreEvent};
use crate::history::IngestReport;
use crate::inbox::InboxEntry;
use crate::pipeline::SendRequest;
use crate::session::ChatSession;

type Reply<T> = oneshot::Sender<T>;

/// Requests handled by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Send {
        request: SendRequest,
        reply: Reply<Result<Message, SendError>>,
    },
    /// Current inbox.
    Snapshot {
        reply: Reply<Result<Vec<InboxEntry>, StoreError>>,
    },
    /// Message history of one conversation.
    History {
        kind: ConversationKind,
        conversation_id: ConversationId,
        reply: Reply<Result<Vec<Message>, StoreError>>,
    },
    Hydrate {
        kind: ConversationKind,
        conversation_id: ConversationId,
        records: Vec<ChatRecord>,
        reply: Reply<Result<IngestReport, StoreError>>,
    },
    UpsertConversations {
        conversations: Vec<Conversation>,
        reply: Reply<Result<(), StoreError>>,
    },
    Logout {
        reply: Reply<Result<(), StoreError>>,
    },
    Shutdown,
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    events: EventBus,
}

/// Move `session` onto its own task. The task applies user commands and
/// inbound events from `channel` one at a time until shut down.
pub fn spawn_session<S>(
    session: ChatSession<S>,
    channel: Arc<dyn SignalingChannel>,
) -> (SessionHandle, JoinHandle<()>)
where
    S: LocalState + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let events = session.events().clone();
    let task = tokio::spawn(session_loop(session, channel, cmd_rx));
    (SessionHandle { cmd_tx, events }, task)
}

async fn session_loop<S: LocalState>(
    mut session: ChatSession<S>,
    channel: Arc<dyn SignalingChannel>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    let mut inbound = channel.subscribe(EventKind::All);
    let mut inbound_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("All session handles dropped");
                    break;
                };
                if !handle_command(&mut session, cmd) {
                    break;
                }
            }
            event = inbound.recv(), if inbound_open => {
                match event {
                    Some(event) => {
                        if let Err(e) = session.apply(event) {
                            warn!(error = %e, "Failed to apply signaling event");
                        }
                    }
                    None => {
                        warn!("Signaling event stream closed");
                        inbound_open = false;
                    }
                }
            }
        }
    }

    info!("Session task stopped");
}

/// Returns `false` when the loop should stop.
fn handle_command<S: LocalState>(session: &mut ChatSession<S>, cmd: SessionCommand) -> bool {
    // A dropped reply receiver only means the caller stopped waiting.
    match cmd {
        SessionCommand::Send { request, reply } => {
            let _ = reply.send(session.send(request));
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(session.inbox());
        }
        SessionCommand::History {
            kind,
            conversation_id,
            reply,
        } => {
            let _ = reply.send(session.messages(kind, &conversation_id));
        }
        SessionCommand::Hydrate {
            kind,
            conversation_id,
            records,
            reply,
        } => {
            let _ = reply.send(session.hydrate(kind, &conversation_id, &records));
        }
        SessionCommand::UpsertConversations {
            conversations,
            reply,
        } => {
            let _ = reply.send(session.upsert_conversations(conversations));
        }
        SessionCommand::Logout { reply } => {
            let _ = reply.send(session.logout());
        }
        SessionCommand::Shutdown => return false,
    }
    true
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn send(&self, request: SendRequest) -> Result<Message, SessionError> {
        Ok(self
            .request(|reply| SessionCommand::Send { request, reply })
            .await??)
    }

    pub async fn inbox(&self) -> Result<Vec<InboxEntry>, SessionError> {
        Ok(self
            .request(|reply| SessionCommand::Snapshot { reply })
            .await??)
    }

    pub async fn messages(
        &self,
        kind: ConversationKind,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, SessionError> {
        Ok(self
            .request(|reply| SessionCommand::History {
                kind,
                conversation_id,
                reply,
            })
            .await??)
    }

    pub async fn hydrate(
        &self,
        kind: ConversationKind,
        conversation_id: ConversationId,
        records: Vec<ChatRecord>,
    ) -> Result<IngestReport, SessionError> {
        Ok(self
            .request(|reply| SessionCommand::Hydrate {
                kind,
                conversation_id,
                records,
                reply,
            })
            .await??)
    }

    pub async fn upsert_conversations(
        &self,
        conversations: Vec<Conversation>,
    ) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| SessionCommand::UpsertConversations {
                conversations,
                reply,
            })
            .await??)
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        Ok(self.request(|reply| SessionCommand::Logout { reply }).await??)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
