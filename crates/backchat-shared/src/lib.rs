//! Types shared by every backchat crate: identifiers, the signaling wire
//! envelope, protocol constants and timestamp normalization.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod time;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ChatPayload, ChatRecord, DeliveredPayload, Envelope, InvalidatePayload};
pub use types::{
    ClientMessageId, ConversationId, ConversationKind, InvalidationDomain, MessageKind, UserId,
};
