//! Ingest of remote chat records into the Message Cache.
//!
//! Records arrive either as a fetched page of history or as a live echo on
//! the signaling channel. Both paths go through [`hydrate`], which normalizes
//! the record and relies on the cache's idempotent append to drop copies of
//! messages we already hold.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use backchat_shared::protocol::ChatRecord;
use backchat_shared::time::parse_timestamp_or_epoch;
use backchat_shared::{ConversationId, ConversationKind, UserId};
use backchat_store::{AppendOutcome, Message, MessageCache, StoreError};

/// Display details for a message author, as carried on remote records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sender {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl Sender {
    pub fn from_record(record: &ChatRecord) -> Option<(UserId, Sender)> {
        let id = record.uuid.clone()?;
        Some((
            id,
            Sender {
                name: record.username.clone(),
                avatar: record.image.clone(),
            },
        ))
    }
}

/// Server creation time. Missing or malformed values map to the epoch.
pub fn parse_created_at(raw: Option<&str>) -> DateTime<Utc> {
    raw.map(parse_timestamp_or_epoch)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn to_message(
    kind: ConversationKind,
    conversation_id: &ConversationId,
    record: &ChatRecord,
    delivered: bool,
) -> Message {
    Message {
        client_id: record.client_generated_uuid,
        conversation_kind: kind,
        conversation_id: conversation_id.clone(),
        sender_id: record.uuid.clone().unwrap_or_default(),
        text: record.message.clone(),
        created_at: parse_created_at(record.created_at.as_deref()),
        kind: record.message_kind,
        received: record.received,
        delivered,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub appended: usize,
    pub duplicates: usize,
}

impl IngestReport {
    pub fn changed(&self) -> bool {
        self.appended > 0
    }
}

/// Append `records` to the log of `(kind, conversation_id)`, skipping ones
/// already present. Duplicates still fold their receipt flags into the stored
/// copy.
///
/// Returns the cached version of every record: for a duplicate that is the
/// stored message, not the one rebuilt from the record.
pub fn hydrate<C: MessageCache + ?Sized>(
    cache: &mut C,
    kind: ConversationKind,
    conversation_id: &ConversationId,
    records: &[ChatRecord],
    delivered: bool,
) -> Result<(IngestReport, Vec<Message>), StoreError> {
    let mut report = IngestReport::default();
    let mut messages = Vec::with_capacity(records.len());

    for record in records {
        let message = to_message(kind, conversation_id, record, delivered);
        let cached = match cache.append_message(message.clone())? {
            AppendOutcome::Appended => {
                report.appended += 1;
                message
            }
            AppendOutcome::Duplicate => {
                debug!(msg_id = %message.client_id, "Skipping known message");
                report.duplicates += 1;
                cache.get_message(message.client_id)?.unwrap_or(message)
            }
        };
        messages.push(cached);
    }

    debug!(
        conversation = %conversation_id,
        appended = report.appended,
        duplicates = report.duplicates,
        "Ingested chat records"
    );
    Ok((report, messages))
}
