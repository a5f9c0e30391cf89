use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ClientMessageId, ConversationId, ConversationKind, InvalidationDomain, MessageKind, UserId};

/// All envelopes exchanged over the signaling channel.
///
/// On the wire every envelope is a JSON object `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    /// Outbound chat messages, or their echo from the remote system
    #[serde(rename = "CHAT_MESSAGE")]
    ChatMessage(ChatPayload),

    /// Delivery receipts for previously sent messages
    #[serde(rename = "DELIVERED")]
    Delivered(DeliveredPayload),

    /// Out-of-band notice that a local cache domain is stale
    #[serde(rename = "INVALIDATE")]
    Invalidate(InvalidatePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub messages: Vec<ChatRecord>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub room: ConversationId,
}

/// A single chat message on the wire.
///
/// Outbound records only carry the first three fields. Records echoed or
/// fetched from the remote system additionally name the sender and the
/// server-side creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub client_generated_uuid: ClientMessageId,
    pub message: String,
    #[serde(default)]
    pub message_kind: MessageKind,
    /// Sender uuid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Epoch milliseconds, stringified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub received: bool,
}

impl ChatRecord {
    /// The minimal record sent for a freshly composed message.
    pub fn outbound(client_id: ClientMessageId, text: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            client_generated_uuid: client_id,
            message: text.into(),
            message_kind: kind,
            uuid: None,
            username: None,
            image: None,
            created_at: None,
            received: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredPayload {
    pub client_generated_uuids: Vec<ClientMessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidatePayload {
    #[serde(rename = "type")]
    pub domain: InvalidationDomain,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Envelope {
    /// Build the envelope for a single composed message addressed to a room.
    pub fn chat_message(kind: ConversationKind, room: ConversationId, record: ChatRecord) -> Self {
        Self::ChatMessage(ChatPayload {
            messages: vec![record],
            kind,
            room,
        })
    }

    pub fn invalidate(domain: InvalidationDomain) -> Self {
        Self::Invalidate(InvalidatePayload { domain })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => crate::constants::CHAT_MESSAGE,
            Self::Delivered(_) => crate::constants::DELIVERED,
            Self::Invalidate(_) => crate::constants::INVALIDATE,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_chat_message_shape() {
        let id = ClientMessageId::generate();
        let env = Envelope::chat_message(
            ConversationKind::Individual,
            ConversationId::new("conv1"),
            ChatRecord::outbound(id, "hi", MessageKind::Text),
        );

        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "CHAT_MESSAGE",
                "payload": {
                    "messages": [{
                        "client_generated_uuid": id.to_string(),
                        "message": "hi",
                        "message_kind": "text",
                    }],
                    "type": "individual",
                    "room": "conv1",
                }
            })
        );
    }

    #[test]
    fn decodes_echo_with_sender_metadata() {
        let raw = r#"{
            "type": "CHAT_MESSAGE",
            "payload": {
                "type": "collection",
                "room": 7,
                "messages": [{
                    "client_generated_uuid": "6f1c1b9e-5d55-4c1e-9d3e-1f0b0b7c2a11",
                    "message": "gm",
                    "uuid": "user-b",
                    "username": "bee",
                    "created_at": "1700000000000",
                    "received": true
                }]
            }
        }"#;

        let Envelope::ChatMessage(payload) = Envelope::from_json(raw).unwrap() else {
            panic!("expected chat message");
        };
        assert_eq!(payload.room.as_str(), "7");
        assert_eq!(payload.kind, ConversationKind::Collection);
        let record = &payload.messages[0];
        assert_eq!(record.message_kind, MessageKind::Text);
        assert_eq!(record.uuid, Some(UserId::new("user-b")));
        assert!(record.received);
    }

    #[test]
    fn decodes_invalidate_and_receipts() {
        let env = Envelope::from_json(r#"{"type":"INVALIDATE","payload":{"type":"friendship"}}"#)
            .unwrap();
        assert_eq!(env, Envelope::invalidate(InvalidationDomain::Friendship));
        assert_eq!(env.type_name(), "INVALIDATE");

        let env = Envelope::from_json(
            r#"{"type":"DELIVERED","payload":{"client_generated_uuids":["6f1c1b9e-5d55-4c1e-9d3e-1f0b0b7c2a11"]}}"#,
        )
        .unwrap();
        assert!(matches!(env, Envelope::Delivered(p) if p.client_generated_uuids.len() == 1));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Envelope::from_json(r#"{"type":"NOPE","payload":{}}"#).is_err());
    }
}
