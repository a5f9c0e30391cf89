//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can start with zero
//! configuration against a local signaling server.

use std::path::PathBuf;
use std::time::Duration;

use backchat_net::SignalingConfig;
use backchat_shared::constants::{
    DEFAULT_EVENT_BUFFER, DEFAULT_OUTBOUND_QUEUE, DEFAULT_RECONNECT_INITIAL_MS,
    DEFAULT_RECONNECT_MAX_MS, DEFAULT_SIGNALING_URL,
};
use backchat_shared::UserId;

/// Where the session keeps its conversations and messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; gone at logout.
    Memory,
    /// SQLite file in the platform data directory.
    Default,
    /// SQLite file at an explicit path.
    Path(PathBuf),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling endpoint.
    /// Env: `SIGNALING_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub signaling_url: String,

    /// The logged-in user's uuid.
    /// Env: `BACKCHAT_USER_ID`
    pub user_id: UserId,

    /// Env: `BACKCHAT_USERNAME`
    pub username: Option<String>,

    /// Env: `RECONNECT_INITIAL_MS`
    /// Default: `500`
    pub reconnect_initial: Duration,

    /// Env: `RECONNECT_MAX_MS`
    /// Default: `30000`
    pub reconnect_max: Duration,

    /// Env: `OUTBOUND_QUEUE`
    /// Default: `256`
    pub outbound_queue: usize,

    /// Env: `EVENT_BUFFER`
    /// Default: `256`
    pub event_buffer: usize,

    /// Env: `BACKCHAT_DB` (`memory`, `default`, or a file path)
    /// Default: `memory`
    pub store: StoreBackend,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            user_id: UserId::default(),
            username: None,
            reconnect_initial: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            event_buffer: DEFAULT_EVENT_BUFFER,
            store: StoreBackend::Memory,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("SIGNALING_URL") {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                config.signaling_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid SIGNALING_URL, using default");
            }
        }

        if let Some(id) = lookup("BACKCHAT_USER_ID") {
            config.user_id = UserId::new(id.trim());
        }

        if let Some(name) = lookup("BACKCHAT_USERNAME") {
            if !name.trim().is_empty() {
                config.username = Some(name.trim().to_string());
            }
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "RECONNECT_INITIAL_MS") {
            config.reconnect_initial = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_number::<u64>(&lookup, "RECONNECT_MAX_MS") {
            config.reconnect_max = Duration::from_millis(ms);
        }

        if config.reconnect_max < config.reconnect_initial {
            tracing::warn!("RECONNECT_MAX_MS below RECONNECT_INITIAL_MS, clamping");
            config.reconnect_max = config.reconnect_initial;
        }

        if let Some(n) = parse_number::<usize>(&lookup, "OUTBOUND_QUEUE") {
            config.outbound_queue = n.max(1);
        }

        if let Some(n) = parse_number::<usize>(&lookup, "EVENT_BUFFER") {
            config.event_buffer = n.max(1);
        }

        if let Some(db) = lookup("BACKCHAT_DB") {
            config.store = match db.trim() {
                "" | "memory" => StoreBackend::Memory,
                "default" => StoreBackend::Default,
                path => StoreBackend::Path(PathBuf::from(path)),
            };
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Settings for the signaling task.
    pub fn signaling(&self) -> SignalingConfig {
        SignalingConfig {
            url: self.signaling_url.clone(),
            reconnect_initial: self.reconnect_initial,
            reconnect_max: self.reconnect_max,
            outbound_queue: self.outbound_queue,
            event_buffer: self.event_buffer,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.reconnect_initial, Duration::from_millis(500));
    }

    #[test]
    fn test_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SIGNALING_URL", "wss://chat.example.invalid/ws"),
            ("BACKCHAT_USER_ID", " user-a "),
            ("RECONNECT_INITIAL_MS", "100"),
            ("RECONNECT_MAX_MS", "50"),
            ("BACKCHAT_DB", "/tmp/backchat.db"),
        ]));

        assert_eq!(config.signaling_url, "wss://chat.example.invalid/ws");
        assert_eq!(config.user_id, UserId::new("user-a"));
        assert_eq!(config.reconnect_max, Duration::from_millis(100));
        assert_eq!(
            config.store,
            StoreBackend::Path(PathBuf::from("/tmp/backchat.db"))
        );
        assert_eq!(config.signaling().url, config.signaling_url);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SIGNALING_URL", "http://not-a-socket"),
            ("OUTBOUND_QUEUE", "lots"),
        ]));

        assert_eq!(config.signaling_url, DEFAULT_SIGNALING_URL);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
    }
}
