//! # backchat-store
//!
//! Local state for a chat session: the Conversation Store and the Message
//! Cache. Both are expressed as traits so the session can run against the
//! default in-memory [`MemoryStore`] or against a SQLite-backed
//! [`Database`] when the local mirror should survive restarts.

pub mod conversations;
pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use conversations::ConversationStore;
pub use database::Database;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use messages::{AppendOutcome, MessageCache};
pub use models::*;

/// Everything the outbound pipeline and the session need from local state.
pub trait LocalState: ConversationStore + MessageCache {}

impl<T: ConversationStore + MessageCache> LocalState for T {}
