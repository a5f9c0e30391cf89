//! The Message Cache contract and its SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use backchat_shared::{ClientMessageId, ConversationId, ConversationKind, MessageKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

/// Result of appending to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// A message with the same client id was already stored. Not an error:
    /// the optimistic copy and the remote echo collapse here.
    Duplicate,
}

/// Per-conversation, append-only message log, deduplicated by client id.
pub trait MessageCache {
    /// Append `message` unless its client id is already stored. A duplicate
    /// still contributes its `received` / `delivered` flags to the stored copy
    /// but never changes its position.
    fn append_message(&mut self, message: Message) -> Result<AppendOutcome>;

    /// Messages of one conversation in insertion order.
    fn list_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>>;

    fn has_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(!self.list_messages(kind, conversation_id)?.is_empty())
    }

    /// Flag a message as delivered. Returns `false` when the id is unknown.
    fn mark_delivered(&mut self, client_id: ClientMessageId) -> Result<bool>;

    fn get_message(&self, client_id: ClientMessageId) -> Result<Option<Message>>;

    fn clear_messages(&mut self) -> Result<()>;
}

const SELECT_COLUMNS: &str = "client_id, conversation_kind, conversation_id, sender_id, text, \
     created_at, kind, received, delivered";

impl MessageCache for Database {
    fn append_message(&mut self, message: Message) -> Result<AppendOutcome> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO messages
                (client_id, conversation_kind, conversation_id, sender_id, text, created_at,
                 kind, received, delivered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.client_id.to_string(),
                message.conversation_kind.as_str(),
                message.conversation_id.as_str(),
                message.sender_id.as_str(),
                message.text,
                message.created_at.to_rfc3339(),
                message.kind.as_str(),
                message.received,
                message.delivered,
            ],
        )?;

        if inserted > 0 {
            return Ok(AppendOutcome::Appended);
        }

        self.conn().execute(
            "UPDATE messages
             SET received = received OR ?2, delivered = delivered OR ?3
             WHERE client_id = ?1",
            params![
                message.client_id.to_string(),
                message.received,
                message.delivered,
            ],
        )?;
        Ok(AppendOutcome::Duplicate)
    }

    fn list_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM messages
             WHERE conversation_kind = ?1 AND conversation_id = ?2
             ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(params![kind.as_str(), conversation_id.as_str()], read_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row_to_message(row?)?);
        }
        Ok(messages)
    }

    fn has_messages(
        &self,
        kind: ConversationKind,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages
                 WHERE conversation_kind = ?1 AND conversation_id = ?2
                 LIMIT 1",
                params![kind.as_str(), conversation_id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_delivered(&mut self, client_id: ClientMessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET delivered = 1 WHERE client_id = ?1",
            params![client_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn get_message(&self, client_id: ClientMessageId) -> Result<Option<Message>> {
        let raw = self
            .conn()
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM messages WHERE client_id = ?1"),
                params![client_id.to_string()],
                read_row,
            )
            .optional()?;

        raw.map(row_to_message).transpose()
    }

    fn clear_messages(&mut self) -> Result<()> {
        self.conn().execute("DELETE FROM messages", [])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct RawMessage {
    client_id: String,
    conversation_kind: String,
    conversation_id: String,
    sender_id: String,
    text: String,
    created_at: String,
    kind: String,
    received: bool,
    delivered: bool,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        client_id: row.get(0)?,
        conversation_kind: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
        kind: row.get(6)?,
        received: row.get(7)?,
        delivered: row.get(8)?,
    })
}

fn row_to_message(raw: RawMessage) -> Result<Message> {
    let created_at: DateTime<Utc> =
        DateTime::parse_from_rfc3339(&raw.created_at)?.with_timezone(&Utc);
    let kind: MessageKind = raw.kind.parse().map_err(StoreError::InvalidValue)?;
    let conversation_kind: ConversationKind = raw
        .conversation_kind
        .parse()
        .map_err(StoreError::InvalidValue)?;

    Ok(Message {
        client_id: ClientMessageId::parse_str(&raw.client_id)?,
        conversation_kind,
        conversation_id: ConversationId(raw.conversation_id),
        sender_id: UserId(raw.sender_id),
        text: raw.text,
        created_at,
        kind,
        received: raw.received,
        delivered: raw.delivered,
    })
}
