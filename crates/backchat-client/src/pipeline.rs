//! Outbound message pipeline.
//!
//! Turns a composed message into local state and a signaling envelope:
//!
//! 1. validate the text,
//! 2. mint a client id,
//! 3. bootstrap an individual conversation on first contact and announce it
//!    to every channel subscriber as a `friendship` invalidation,
//! 4. dispatch the envelope (fire-and-forget),
//! 5. append the message optimistically,
//! 6. return the appended message.
//!
//! Acceptance here means *local* acceptance. Whether the message reaches the
//! remote side is reported later through the signaling channel.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use backchat_net::{SignalEvent, SignalingChannel};
use backchat_shared::constants::MAX_MESSAGE_SIZE;
use backchat_shared::protocol::{ChatRecord, Envelope};
use backchat_shared::{
    ClientMessageId, ConversationId, ConversationKind, InvalidationDomain, MessageKind, UserId,
};
use backchat_store::{AppendOutcome, Conversation, IndividualConversation, LocalState, Message};

use crate::error::SendError;
use crate::events::{EventBus, StoreEvent};

/// A message composed by the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub conversation_id: ConversationId,
    pub kind: ConversationKind,
    pub text: String,
    /// Only meaningful for individual conversations; seeds the conversation
    /// record on first contact.
    pub remote_user_id: Option<UserId>,
    pub remote_username: Option<String>,
}

impl SendRequest {
    pub fn individual(
        conversation_id: impl Into<ConversationId>,
        text: impl Into<String>,
        remote_user_id: Option<UserId>,
        remote_username: Option<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: ConversationKind::Individual,
            text: text.into(),
            remote_user_id,
            remote_username,
        }
    }

    pub fn collection(conversation_id: impl Into<ConversationId>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind: ConversationKind::Collection,
            text: text.into(),
            remote_user_id: None,
            remote_username: None,
        }
    }
}

pub struct OutboundPipeline {
    current_user: UserId,
    channel: Arc<dyn SignalingChannel>,
    events: EventBus,
}

impl OutboundPipeline {
    pub fn new(current_user: UserId, channel: Arc<dyn SignalingChannel>, events: EventBus) -> Self {
        Self {
            current_user,
            channel,
            events,
        }
    }

    pub fn current_user(&self) -> &UserId {
        &self.current_user
    }

    pub fn send<S: LocalState + ?Sized>(
        &self,
        state: &mut S,
        request: SendRequest,
    ) -> Result<Message, SendError> {
        let SendRequest {
            conversation_id,
            kind,
            text,
            remote_user_id,
            remote_username,
        } = request;

        if text.trim().is_empty() {
            return Err(SendError::Empty);
        }
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(SendError::TooLong {
                len: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let client_id = ClientMessageId::generate();
        let now = Utc::now();

        let first_contact = kind == ConversationKind::Individual
            && !state.has_messages(kind, &conversation_id)?;

        let bootstrapped = first_contact && {
            let conversation = Conversation::Individual(IndividualConversation {
                id: conversation_id.clone(),
                remote_user_id: remote_user_id.unwrap_or_default(),
                remote_username,
                last_message: Some(text.clone()),
                last_message_sender: Some(self.current_user.clone()),
                last_message_timestamp: Some(now),
                last_message_client_id: Some(client_id),
            });
            state.insert_conversation_if_absent(conversation)?
        };

        if bootstrapped {
            info!(conversation = %conversation_id, "Created conversation on first contact");
            self.events.publish(StoreEvent::ConversationsChanged);
            self.channel
                .notify_local(SignalEvent::Invalidate(InvalidationDomain::Friendship));
        }

        let envelope = Envelope::chat_message(
            kind,
            conversation_id.clone(),
            ChatRecord::outbound(client_id, text.clone(), MessageKind::Text),
        );
        match self.channel.send(&envelope) {
            Ok(()) => debug!(msg_id = %client_id, "Envelope handed to signaling channel"),
            Err(e) => warn!(
                msg_id = %client_id,
                conversation = %conversation_id,
                error = %e,
                "Dispatch failed, message left pending"
            ),
        }

        let message = Message {
            client_id,
            conversation_kind: kind,
            conversation_id: conversation_id.clone(),
            sender_id: self.current_user.clone(),
            text,
            created_at: now,
            kind: MessageKind::Text,
            received: false,
            delivered: false,
        };

        if state.append_message(message.clone())? == AppendOutcome::Duplicate {
            // A fresh v4 id colliding means the echo beat us here.
            debug!(msg_id = %client_id, "Message already present");
        }

        if !bootstrapped && state.record_activity(kind, &conversation_id, &message)? {
            self.events.publish(StoreEvent::ConversationsChanged);
        }
        self.events
            .publish(StoreEvent::MessagesChanged(kind, conversation_id.clone()));

        info!(msg_id = %client_id, conversation = %conversation_id, kind = %kind, "Message sent");
        Ok(message)
    }
}
