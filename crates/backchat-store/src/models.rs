//! Domain models held by the Conversation Store and the Message Cache.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed to
//! the presentation layer as-is and decoded from remote records. Remote
//! records disagree on field spelling; the aliases below fold them into one
//! canonical schema at ingest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backchat_shared::time::flexible;
use backchat_shared::{ClientMessageId, ConversationId, ConversationKind, MessageKind, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A one-to-one conversation ("friendship") with a remote user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndividualConversation {
    pub id: ConversationId,
    #[serde(default, alias = "remoteUserId")]
    pub remote_user_id: UserId,
    #[serde(default, alias = "remoteUsername")]
    pub remote_username: Option<String>,
    /// Preview text of the most recent message.
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<String>,
    #[serde(default, alias = "lastMessageSender")]
    pub last_message_sender: Option<UserId>,
    #[serde(default, with = "flexible", alias = "lastMessageTimestamp")]
    pub last_message_timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "lastMessageClientId",
        alias = "last_message_client_uuid"
    )]
    pub last_message_client_id: Option<ClientMessageId>,
}

/// An externally provisioned group conversation. Never created client-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionConversation {
    pub id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub members: Vec<UserId>,
    #[serde(default, with = "flexible", alias = "lastMessageTimestamp")]
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Conversation {
    Individual(IndividualConversation),
    Collection(CollectionConversation),
}

impl Conversation {
    pub fn id(&self) -> &ConversationId {
        match self {
            Self::Individual(c) => &c.id,
            Self::Collection(c) => &c.id,
        }
    }

    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::Individual(_) => ConversationKind::Individual,
            Self::Collection(_) => ConversationKind::Collection,
        }
    }

    /// Canonical last-activity timestamp used for ordering across kinds.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Individual(c) => c.last_message_timestamp,
            Self::Collection(c) => c.last_message_timestamp,
        }
    }

    /// Replace this record with `incoming`, keeping the activity timestamp
    /// (and, for individual conversations, the preview it describes) when the
    /// incoming record is older than what is already known.
    pub fn absorb(&mut self, incoming: Conversation) {
        let incoming_is_older = match (self.last_activity(), incoming.last_activity()) {
            (Some(known), Some(new)) => new < known,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !incoming_is_older {
            *self = incoming;
            return;
        }

        match (self, incoming) {
            (Self::Individual(current), Self::Individual(new)) => {
                current.remote_user_id = new.remote_user_id;
                if new.remote_username.is_some() {
                    current.remote_username = new.remote_username;
                }
            }
            (Self::Collection(current), Self::Collection(new)) => {
                current.name = new.name;
                current.image = new.image;
                current.members = new.members;
            }
            // Records are keyed by kind, so a mismatch means the caller
            // deliberately replaced the record.
            (slot, other) => *slot = other,
        }
    }

    /// Advance the activity metadata from `message` if it is not older than
    /// the current activity. Returns whether anything changed.
    pub fn record_activity(&mut self, message: &Message) -> bool {
        if let Some(current) = self.last_activity() {
            if message.created_at < current {
                return false;
            }
        }

        match self {
            Self::Individual(c) => {
                c.last_message = Some(message.text.clone());
                c.last_message_sender = Some(message.sender_id.clone());
                c.last_message_timestamp = Some(message.created_at);
                c.last_message_client_id = Some(message.client_id);
            }
            Self::Collection(c) => {
                c.last_message_timestamp = Some(message.created_at);
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message in a conversation's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Client-generated id; the idempotency key.
    pub client_id: ClientMessageId,
    /// Logs are namespaced like conversations, by `(kind, id)`.
    pub conversation_kind: ConversationKind,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    /// The remote system has acknowledged receipt.
    pub received: bool,
    /// Delivery to the recipient has been corroborated.
    pub delivered: bool,
}

impl Message {
    /// Whether the message is still awaiting delivery confirmation.
    pub fn is_pending(&self) -> bool {
        !self.delivered
    }

    /// Fold confirmation flags from another copy of the same message.
    /// Flags only ever move from `false` to `true`.
    pub fn merge_receipts(&mut self, other: &Message) -> bool {
        let before = (self.received, self.delivered);
        self.received |= other.received;
        self.delivered |= other.delivered;
        before != (self.received, self.delivered)
    }
}
