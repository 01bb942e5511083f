//! Feed configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Missing or unparsable numeric values fall back to defaults;
//! only the endpoint is validated.

use std::time::Duration;

use crate::error::FeedError;
use crate::transport::{TransportOptions, validate_endpoint};

/// Endpoint used when `FEED_ENDPOINT` is not set.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/feed";

/// Top-level feed configuration.
///
/// Loaded once at startup via [`FeedConfig::from_env`], then handed to
/// [`crate::controller::SocketController::from_config`].
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,

    /// Capacity of each connection's delivery conduit.
    pub conduit_capacity: usize,

    /// Log every received frame at `debug` level.
    pub log_frames: bool,

    /// Transport settings for every connection.
    pub transport: TransportOptions,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            conduit_capacity: 64,
            log_frames: false,
            transport: TransportOptions::default(),
        }
    }
}

impl FeedConfig {
    /// Creates a default configuration pointed at `endpoint`.
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// | Variable                | Default                    |
    /// |-------------------------|----------------------------|
    /// | `FEED_ENDPOINT`         | `ws://127.0.0.1:8080/feed` |
    /// | `FEED_CONDUIT_CAPACITY` | `64`                       |
    /// | `FEED_MAX_MESSAGE_SIZE` | `1048576`                  |
    /// | `FEED_CLOSE_GRACE_MS`   | `1000`                     |
    /// | `FEED_DISABLE_NAGLE`    | `true`                     |
    /// | `FEED_LOG_FRAMES`       | `false`                    |
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidEndpoint`] if `FEED_ENDPOINT` is not a
    /// usable WebSocket URL, or [`FeedError::Config`] if the conduit
    /// capacity is zero.
    pub fn from_env() -> Result<Self, FeedError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FeedError> {
        let defaults = Self::default();

        let endpoint = lookup("FEED_ENDPOINT").unwrap_or(defaults.endpoint);
        validate_endpoint(&endpoint)?;

        let conduit_capacity = parse_or(&lookup, "FEED_CONDUIT_CAPACITY", defaults.conduit_capacity);
        if conduit_capacity == 0 {
            return Err(FeedError::Config(
                "FEED_CONDUIT_CAPACITY must be at least 1".to_string(),
            ));
        }

        let transport = TransportOptions {
            max_message_size: parse_or(
                &lookup,
                "FEED_MAX_MESSAGE_SIZE",
                defaults.transport.max_message_size,
            ),
            disable_nagle: parse_bool_or(
                &lookup,
                "FEED_DISABLE_NAGLE",
                defaults.transport.disable_nagle,
            ),
            close_grace: lookup("FEED_CLOSE_GRACE_MS")
                .and_then(|v| v.trim().parse().ok())
                .map_or(defaults.transport.close_grace, Duration::from_millis),
        };

        Ok(Self {
            endpoint,
            conduit_capacity,
            log_frames: parse_bool_or(&lookup, "FEED_LOG_FRAMES", defaults.log_frames),
            transport,
        })
    }
}

/// Parses `key` as `T`, returning `default` on missing or invalid values.
fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses `key` as a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
