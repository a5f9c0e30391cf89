// Signaling channel: the long-lived bidirectional transport used to dispatch
// outbound chat envelopes and to receive invalidation / delivery events.

pub mod channel;
pub mod loopback;
pub mod signaling;

pub use channel::{ChannelError, ConnectionState, EventKind, SignalEvent, SignalingChannel, Subscription};
pub use loopback::LoopbackChannel;
pub use signaling::{SignalingConfig, SignalingManager};
