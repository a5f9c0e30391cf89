//! In-memory session state.
//!
//! This is the default backing for a client session: created at login,
//! dropped at logout. It is owned by a single task, so nothing here locks.

use std::collections::HashMap;

use backchat_shared::{ClientMessageId, ConversationId, ConversationKind};

use crate::conversations::ConversationStore;
use crate::error::Result;
use crate::messages::{AppendOutcome, MessageCache};
use crate::models::{Conversation, Message};

type LogKey = (ConversationKind, ConversationId);

#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: HashMap<(ConversationKind, ConversationId), Conversation>,
    messages: HashMap<LogKey, Vec<Message>>,
    /// client id -> (conversation, position in its log)
    index: HashMap<ClientMessageId, (LogKey, usize)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, client_id: ClientMessageId) -> Option<&mut Message> {
        let (key, position) = self.index.get(&client_id)?;
        self.messages
            .get_mut(key)
            .and_then(|log| log.get_mut(*position))
    }
}

impl ConversationStore for MemoryStore {
    fn upsert_conversation(&mut self, conversation: Conversation) -> Result<()> {
        let key = (conversation.kind(), conversation.id().clone());
        match self.conversations.get_mut(&key) {
            Some(existing) => existing.absorb(conversation),
            None => {
                self.conversations.insert(key, conversation);
            }
        }
        Ok(())
    }

    fn insert_conversation_if_absent(&mut self, conversation: Conversation) -> Result<bool> {
        let key = (conversation.kind(), conversation.id().clone());
        if self.conversations.contains_key(&key) {
            return Ok(false);
        }
        self.conversations.insert(key, conversation);
        Ok(true)
    }

    fn get_conversation(
        &self,
        kind: ConversationKind,
        id: &ConversationId,
    ) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(&(kind, id.clone())).cloned())
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.values().cloned().collect())
    }

    fn record_activity(
        &mut self,
        kind: ConversationKind,
        id: &ConversationId,
        message: &Message,
    ) -> Result<bool> {
        Ok(self
            .conversations
            .get_mut(&(kind, id.clone()))
            .map(|c| c.record_activity(message))
            .unwrap_or(false))
    }

    fn clear_conversations(&mut self) -> Result<()> {
        self.conversations.clear();
        Ok(())
    }
}

impl MessageCache for MemoryStore {
    fn append_message(&mut self, message: Message) -> Result<AppendOutcome> {
        if let Some(stored) = self.slot_mut(message.client_id) {
            stored.merge_receipts(&message);
            return Ok(AppendOutcome::Duplicate);
        }

        let key = (message.conversation_kind, message.conversation_id.clone());
        let log = self.messages.entry(key.clone()).or_default();
        self.index.insert(message.client_id, (key, log.len()));
        log.push(message);
        Ok(AppendOutcome::Appended)
    }

    fn list_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .get(&(kind, conversation_id.clone()))
            .cloned()
            .unwrap_or_default())
    }

    fn has_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(self
            .messages
            .get(&(kind, conversation_id.clone()))
            .is_some_and(|log| !log.is_empty()))
    }

    fn mark_delivered(&mut self, client_id: ClientMessageId) -> Result<bool> {
        Ok(match self.slot_mut(client_id) {
            Some(message) => {
                message.delivered = true;
                true
            }
            None => false,
        })
    }

    fn get_message(&self, client_id: ClientMessageId) -> Result<Option<Message>> {
        Ok(self.index.get(&client_id).and_then(|(key, position)| {
            self.messages
                .get(key)
                .and_then(|log| log.get(*position))
                .cloned()
        }))
    }

    fn clear_messages(&mut self) -> Result<()> {
        self.messages.clear();
        self.index.clear();
        Ok(())
    }
}
