/// Envelope type for outbound and echoed chat messages
pub const CHAT_MESSAGE: &str = "CHAT_MESSAGE";

/// Envelope type for delivery receipts
pub const DELIVERED: &str = "DELIVERED";

/// Envelope type for cache invalidation notices
pub const INVALIDATE: &str = "INVALIDATE";

/// Maximum composed message size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Default signaling endpoint for local development
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";

/// Reconnect backoff bounds in milliseconds
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Capacity of the outbound envelope queue
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Capacity of broadcast channels carrying inbound and store events
pub const DEFAULT_EVENT_BUFFER: usize = 256;
