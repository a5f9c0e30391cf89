pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod history;
pub mod inbox;
pub mod pipeline;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::{ClientConfig, StoreBackend};
pub use driver::{spawn_session, SessionHandle};
pub use error::{SendError, SessionError};
pub use events::{EventBus, StoreEvent};
pub use inbox::{build_inbox, InboxEntry};
pub use pipeline::{OutboundPipeline, SendRequest};
pub use session::ChatSession;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// directives. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("backchat_client=debug,backchat_net=debug,backchat_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
