//! Configuration for the transport client and the relay server.

use std::time::Duration;

/// Reconnect policy: capped exponential backoff.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at `max_delay`.
/// `max_retries == 0` disables automatic reconnection entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// No automatic reconnection; `connect()` failures surface immediately.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether any retry attempts are allowed.
    pub fn enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Backoff delay before the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Transport client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collaboration server URL, e.g. `ws://127.0.0.1:9090`.
    pub server_url: String,
    /// Automatic reconnection behavior.
    pub reconnect: ReconnectPolicy,
    /// Minimum interval between outbound cursor messages. Zero disables
    /// throttling.
    pub cursor_interval: Duration,
    /// Whether the roster is cleared when the connection drops. Off by
    /// default: stale presence stays visible until a `leave` arrives or the
    /// session reconnects.
    pub clear_roster_on_disconnect: bool,
    /// Event fan-out channel capacity per subscriber.
    pub event_capacity: usize,
    /// Outbound message buffer between senders and the socket writer.
    pub outgoing_capacity: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            reconnect: ReconnectPolicy::default(),
            cursor_interval: Duration::from_millis(33),
            clear_roster_on_disconnect: false,
            event_capacity: 256,
            outgoing_capacity: 256,
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Maximum peers per session room; excess connections are refused.
    pub max_peers_per_session: usize,
    /// Broadcast channel capacity per room.
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_session: 100,
            broadcast_capacity: 256,
        }
    }
}
