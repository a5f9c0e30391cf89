//! The Conversation Store contract and its SQLite implementation.

use rusqlite::{params, OptionalExtension};

use backchat_shared::{ConversationId, ConversationKind};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Conversation, Message};

/// Known conversations keyed by `(kind, id)`.
///
/// `upsert` is idempotent; conflicting fields resolve last-write-wins, except
/// that a conversation's activity timestamp never moves backwards.
pub trait ConversationStore {
    fn upsert_conversation(&mut self, conversation: Conversation) -> Result<()>;

    /// Insert `conversation` unless a record with the same key exists.
    /// Returns `true` when a new record was created.
    fn insert_conversation_if_absent(&mut self, conversation: Conversation) -> Result<bool>;

    fn get_conversation(
        &self,
        kind: ConversationKind,
        id: &ConversationId,
    ) -> Result<Option<Conversation>>;

    /// All known conversations, in no particular order.
    fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Advance the activity metadata of a known conversation from `message`.
    /// Returns `false` when the conversation is unknown or the message is
    /// older than its current activity.
    fn record_activity(
        &mut self,
        kind: ConversationKind,
        id: &ConversationId,
        message: &Message,
    ) -> Result<bool>;

    fn clear_conversations(&mut self) -> Result<()>;
}

impl Database {
    fn write_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations (kind, id, record, last_activity)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (kind, id) DO UPDATE SET
                record = excluded.record,
                last_activity = excluded.last_activity",
            params![
                conversation.kind().as_str(),
                conversation.id().as_str(),
                serde_json::to_string(conversation)?,
                conversation.last_activity().map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

impl ConversationStore for Database {
    fn upsert_conversation(&mut self, conversation: Conversation) -> Result<()> {
        let merged = match self.get_conversation(conversation.kind(), conversation.id())? {
            Some(mut existing) => {
                existing.absorb(conversation);
                existing
            }
            None => conversation,
        };
        self.write_conversation(&merged)
    }

    fn insert_conversation_if_absent(&mut self, conversation: Conversation) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO conversations (kind, id, record, last_activity)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.kind().as_str(),
                conversation.id().as_str(),
                serde_json::to_string(&conversation)?,
                conversation.last_activity().map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(affected > 0)
    }

    fn get_conversation(
        &self,
        kind: ConversationKind,
        id: &ConversationId,
    ) -> Result<Option<Conversation>> {
        let record: Option<String> = self
            .conn()
            .query_row(
                "SELECT record FROM conversations WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match record {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT record FROM conversations ORDER BY kind, id")?;

        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(serde_json::from_str(&row?)?);
        }
        Ok(conversations)
    }

    fn record_activity(
        &mut self,
        kind: ConversationKind,
        id: &ConversationId,
        message: &Message,
    ) -> Result<bool> {
        let Some(mut conversation) = self.get_conversation(kind, id)? else {
            return Ok(false);
        };
        if !conversation.record_activity(message) {
            return Ok(false);
        }
        self.write_conversation(&conversation)?;
        Ok(true)
    }

    fn clear_conversations(&mut self) -> Result<()> {
        self.conn().execute("DELETE FROM conversations", [])?;
        Ok(())
    }
}
