//! Per-login chat session.
//!
//! A [`ChatSession`] owns the local state for one logged-in user. It is
//! driven from a single task (see [`crate::driver`]), so the stores are
//! mutated without locks: user sends and inbound signaling events are
//! applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use backchat_net::{SignalEvent, SignalingChannel};
use backchat_shared::protocol::ChatRecord;
use backchat_shared::{ClientMessageId, ConversationId, ConversationKind, UserId};
use backchat_store::{Conversation, LocalState, Message, StoreError};

use crate::error::SendError;
use crate::events::{EventBus, StoreEvent};
use crate::history::{self, IngestReport, Sender};
use crate::inbox::{build_inbox, InboxEntry};
use crate::pipeline::{OutboundPipeline, SendRequest};

pub struct ChatSession<S> {
    state: S,
    pipeline: OutboundPipeline,
    /// Display details of message authors seen so far.
    senders: HashMap<UserId, Sender>,
    events: EventBus,
}

impl<S: LocalState> ChatSession<S> {
    pub fn new(
        current_user: UserId,
        state: S,
        channel: Arc<dyn SignalingChannel>,
        events: EventBus,
    ) -> Self {
        info!(user = %current_user.short(), "Starting chat session");
        Self {
            state,
            pipeline: OutboundPipeline::new(current_user, channel, events.clone()),
            senders: HashMap::new(),
            events,
        }
    }

    pub fn current_user(&self) -> &UserId {
        self.pipeline.current_user()
    }

    pub fn send(&mut self, request: SendRequest) -> Result<Message, SendError> {
        self.pipeline.send(&mut self.state, request)
    }

    /// Fold one inbound signaling event into local state.
    pub fn apply(&mut self, event: SignalEvent) -> Result<(), StoreError> {
        match event {
            SignalEvent::Invalidate(domain) => {
                debug!(?domain, "Remote invalidation");
                self.events.publish(StoreEvent::Invalidated(domain));
            }
            SignalEvent::ChatMessages(payload) => {
                let (report, messages) = history::hydrate(
                    &mut self.state,
                    payload.kind,
                    &payload.room,
                    &payload.messages,
                    false,
                )?;
                self.remember_senders(&payload.messages);

                // `messages` holds the cached copies, so an echo of our own
                // message advances the preview with what we stored.
                let mut conversations_changed = false;
                for message in &messages {
                    conversations_changed |=
                        self.state
                            .record_activity(payload.kind, &payload.room, message)?;
                }

                if conversations_changed {
                    self.events.publish(StoreEvent::ConversationsChanged);
                }
                // Duplicates may still have merged receipt flags.
                if !messages.is_empty() {
                    self.events.publish(StoreEvent::MessagesChanged(
                        payload.kind,
                        payload.room.clone(),
                    ));
                }
                debug!(
                    conversation = %payload.room,
                    appended = report.appended,
                    duplicates = report.duplicates,
                    "Applied chat echo"
                );
            }
            SignalEvent::Delivered(ids) => self.apply_receipts(&ids)?,
            SignalEvent::Connection(state) => {
                self.events.publish(StoreEvent::ConnectionChanged(state));
            }
        }
        Ok(())
    }

    fn apply_receipts(&mut self, ids: &[ClientMessageId]) -> Result<(), StoreError> {
        let mut touched: Vec<(ConversationKind, ConversationId)> = Vec::new();
        for &id in ids {
            if !self.state.mark_delivered(id)? {
                debug!(msg_id = %id, "Receipt for unknown message");
                continue;
            }
            if let Some(message) = self.state.get_message(id)? {
                let key = (message.conversation_kind, message.conversation_id);
                if !touched.contains(&key) {
                    touched.push(key);
                }
            }
        }
        for (kind, conversation_id) in touched {
            self.events
                .publish(StoreEvent::MessagesChanged(kind, conversation_id));
        }
        Ok(())
    }

    /// Load a fetched page of history. Records already cached are skipped.
    pub fn hydrate(
        &mut self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
        records: &[ChatRecord],
    ) -> Result<IngestReport, StoreError> {
        let (report, _) =
            history::hydrate(&mut self.state, kind, conversation_id, records, true)?;
        self.remember_senders(records);
        if report.changed() {
            self.events
                .publish(StoreEvent::MessagesChanged(kind, conversation_id.clone()));
        }
        Ok(report)
    }

    /// Merge conversation records fetched from the data layer.
    pub fn upsert_conversations(
        &mut self,
        conversations: Vec<Conversation>,
    ) -> Result<(), StoreError> {
        if conversations.is_empty() {
            return Ok(());
        }
        for conversation in conversations {
            self.state.upsert_conversation(conversation)?;
        }
        self.events.publish(StoreEvent::ConversationsChanged);
        Ok(())
    }

    pub fn messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        self.state.list_messages(kind, conversation_id)
    }

    pub fn inbox(&self) -> Result<Vec<InboxEntry>, StoreError> {
        Ok(build_inbox(self.state.list_conversations()?))
    }

    pub fn sender(&self, user_id: &UserId) -> Option<&Sender> {
        self.senders.get(user_id)
    }

    /// Tear down everything this session cached.
    pub fn logout(&mut self) -> Result<(), StoreError> {
        self.state.clear_conversations()?;
        self.state.clear_messages()?;
        self.senders.clear();
        info!(user = %self.current_user().short(), "Session cleared");
        self.events.publish(StoreEvent::ConversationsChanged);
        Ok(())
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn remember_senders(&mut self, records: &[ChatRecord]) {
        for (id, sender) in records.iter().filter_map(Sender::from_record) {
            self.senders.insert(id, sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use backchat_net::{ConnectionState, LoopbackChannel};
    use backchat_shared::protocol::ChatPayload;
    use backchat_shared::{InvalidationDomain, MessageKind};
    use backchat_store::{ConversationStore, MemoryStore};

    fn session() -> (ChatSession<MemoryStore>, Arc<LoopbackChannel>) {
        let channel = Arc::new(LoopbackChannel::new());
        let session = ChatSession::new(
            UserId::new("me"),
            MemoryStore::new(),
            channel.clone(),
            EventBus::new(64),
        );
        (session, channel)
    }

    fn echo(room: &str, record: ChatRecord) -> SignalEvent {
        SignalEvent::ChatMessages(ChatPayload {
            messages: vec![record],
            kind: ConversationKind::Individual,
            room: ConversationId::new(room),
        })
    }

    #[test]
    fn echo_dedups_against_optimistic_copy() {
        let (mut session, _) = session();
        let sent = session
            .send(SendRequest::individual("conv1", "hi", Some(UserId::new("userB")), None))
            .unwrap();

        let record = ChatRecord {
            uuid: Some(UserId::new("me")),
            created_at: Some(sent.created_at.timestamp_millis().to_string()),
            received: true,
            ..ChatRecord::outbound(sent.client_id, "hi", MessageKind::Text)
        };
        session.apply(echo("conv1", record)).unwrap();

        let log = session
            .messages(ConversationKind::Individual, &ConversationId::new("conv1"))
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].received);
        assert!(log[0].is_pending());
    }

    #[test]
    fn anonymous_echo_keeps_our_sender_on_the_preview() {
        let (mut session, _) = session();
        let sent = session
            .send(SendRequest::individual("conv1", "hi", Some(UserId::new("userB")), None))
            .unwrap();

        // Server stamped it later and dropped the author.
        let stamped = sent.created_at + chrono::Duration::seconds(5);
        let record = ChatRecord {
            uuid: None,
            created_at: Some(stamped.timestamp_millis().to_string()),
            received: true,
            ..ChatRecord::outbound(sent.client_id, "hi", MessageKind::Text)
        };
        session.apply(echo("conv1", record)).unwrap();

        let Some(Conversation::Individual(conv)) = session
            .state()
            .get_conversation(ConversationKind::Individual, &ConversationId::new("conv1"))
            .unwrap()
        else {
            panic!("expected an individual conversation");
        };
        assert_eq!(conv.last_message_sender, Some(UserId::new("me")));
        assert_eq!(conv.last_message_client_id, Some(sent.client_id));
        assert_eq!(conv.last_message_timestamp, Some(sent.created_at));
    }

    #[test]
    fn delivery_flips_flag_and_notifies() {
        let (mut session, _) = session();
        let mut rx = session.events().subscribe();
        let sent = session
            .send(SendRequest::collection("g1", "gm"))
            .unwrap();
        while rx.try_recv().is_ok() {}

        session
            .apply(SignalEvent::Delivered(vec![sent.client_id, ClientMessageId::generate()]))
            .unwrap();

        let log = session
            .messages(ConversationKind::Collection, &ConversationId::new("g1"))
            .unwrap();
        assert!(log[0].delivered);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::MessagesChanged(
                ConversationKind::Collection,
                ConversationId::new("g1")
            )
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remote_message_advances_preview_and_remembers_sender() {
        let (mut session, _) = session();
        session
            .send(SendRequest::individual("conv1", "hi", Some(UserId::new("userB")), None))
            .unwrap();

        let reply_at = chrono::Utc::now() + chrono::Duration::seconds(5);
        let record = ChatRecord {
            uuid: Some(UserId::new("userB")),
            username: Some("bee".into()),
            image: Some("bee.png".into()),
            created_at: Some(reply_at.timestamp_millis().to_string()),
            ..ChatRecord::outbound(ClientMessageId::generate(), "hey", MessageKind::Text)
        };
        session.apply(echo("conv1", record)).unwrap();

        let inbox = session.inbox().unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].preview.as_deref(), Some("hey"));
        assert_eq!(
            session.sender(&UserId::new("userB")).and_then(|s| s.name.as_deref()),
            Some("bee")
        );
        let log = session
            .messages(ConversationKind::Individual, &ConversationId::new("conv1"))
            .unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn invalidation_and_connection_are_forwarded() {
        let (mut session, _) = session();
        let mut rx = session.events().subscribe();

        session
            .apply(SignalEvent::Invalidate(InvalidationDomain::Friendship))
            .unwrap();
        session
            .apply(SignalEvent::Connection(ConnectionState::Disconnected))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Invalidated(InvalidationDomain::Friendship)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::ConnectionChanged(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn logout_clears_everything() {
        let (mut session, _) = session();
        session
            .send(SendRequest::individual("conv1", "hi", None, None))
            .unwrap();

        session.logout().unwrap();

        assert!(session.state().list_conversations().unwrap().is_empty());
        assert!(session
            .messages(ConversationKind::Individual, &ConversationId::new("conv1"))
            .unwrap()
            .is_empty());
        assert!(session.inbox().unwrap().is_empty());
    }
}
