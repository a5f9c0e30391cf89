use thiserror::Error;

use backchat_store::StoreError;

/// Reasons a composed message is refused. Transport trouble is not among
/// them: a message that cannot be dispatched is still accepted locally and
/// stays pending.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Message is empty")]
    Empty,

    #[error("Message too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    /// Only reachable with a persistent store backend.
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Session task has stopped")]
    Closed,
}
