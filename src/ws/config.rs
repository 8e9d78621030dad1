#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_HEARTBEAT_FAILURES: u32 = 2;
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(2);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 16;

/// Payload used both as the liveness probe and as the expected reply.
///
/// The reference endpoint simply echoes text frames, so the probe comes back verbatim.
pub const DEFAULT_HEARTBEAT_PAYLOAD: &str = "ping";

/// Configuration for WebSocket client behavior.
///
/// ```
/// use std::time::Duration;
///
/// use live_room_client::ws::config::Config;
///
/// let config = Config::builder()
///     .heartbeat_interval(Duration::from_secs(5))
///     .max_heartbeat_failures(3)
///     .build();
///
/// assert_eq!(config.heartbeat_payload, "ping");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between liveness probes while connected. A probe that is not answered
    /// within the same interval counts as a missed heartbeat.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats after which the connection is considered dead
    #[builder(default = DEFAULT_MAX_HEARTBEAT_FAILURES)]
    pub max_heartbeat_failures: u32,
    /// Text frame sent as a probe. An inbound frame with this exact payload is treated
    /// as a liveness reply and never reaches the listener.
    #[builder(into, default = DEFAULT_HEARTBEAT_PAYLOAD.to_owned())]
    pub heartbeat_payload: String,
    /// Upper bound for a single connection attempt, handshake included
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            max_heartbeat_failures: DEFAULT_MAX_HEARTBEAT_FAILURES,
            heartbeat_payload: DEFAULT_HEARTBEAT_PAYLOAD.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of automatic retries before giving up. The manager stops once the
    /// retry counter exceeds this value and stays idle until the next explicit `connect`.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Whether an explicit `disconnect` clears the retry counter. When `false`, a manual
    /// reconnect inherits the attempts accumulated before the disconnect.
    pub reset_attempts_on_disconnect: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            reset_attempts_on_disconnect: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_heartbeat_is_ten_seconds() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.max_heartbeat_failures, 2);
        assert_eq!(config.heartbeat_payload, "ping");
    }

    #[test]
    fn default_reconnect_matches_reference_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, Some(16));
        assert_eq!(config.initial_backoff, Duration::from_secs(2));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert!(!config.reset_attempts_on_disconnect, "disconnect keeps attempts by default");
    }

    #[test]
    fn builder_fills_defaults() {
        let config = Config::builder()
            .heartbeat_interval(Duration::from_millis(250))
            .build();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.max_attempts, Some(16));
    }
}
