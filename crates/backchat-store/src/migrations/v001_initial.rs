//! v001 -- Initial schema creation.
//!
//! Creates the `conversations` and `messages` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations (individual and collection share one table)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    kind          TEXT NOT NULL,              -- 'individual' | 'collection'
    id            TEXT NOT NULL,
    record        TEXT NOT NULL,              -- JSON-encoded Conversation
    last_activity TEXT,                       -- RFC-3339, canonical sort key

    PRIMARY KEY (kind, id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_activity
    ON conversations(last_activity DESC);

-- ----------------------------------------------------------------
-- Messages (append-only, deduplicated by client id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
    client_id         TEXT NOT NULL UNIQUE,               -- UUID v4
    conversation_kind TEXT NOT NULL,                      -- 'individual' | 'collection'
    conversation_id   TEXT NOT NULL,
    sender_id         TEXT NOT NULL,
    text              TEXT NOT NULL,
    created_at        TEXT NOT NULL,                      -- RFC-3339
    kind              TEXT NOT NULL DEFAULT 'text',
    received          INTEGER NOT NULL DEFAULT 0,         -- boolean 0/1
    delivered         INTEGER NOT NULL DEFAULT 0          -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_kind, conversation_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
