//! Engine configuration.
//!
//! Plain structs with documented defaults. Every field can be overridden
//! with struct update syntax:
//!
//! ```rust
//! use std::time::Duration;
//! use arena_engine::ClientConfig;
//!
//! let config = ClientConfig {
//!     reconnect_delay: Duration::from_millis(100),
//!     ..ClientConfig::new("127.0.0.1:7000")
//! };
//! assert_eq!(config.tick_rate_hz, 50);
//! ```

use std::time::Duration;

use arena_ipc::ShutdownPolicy;
use arena_tick::TickConfig;
use serde::{Deserialize, Serialize};

/// Address used when none is given.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5555";

/// Configuration for a [`ClientEngine`](crate::ClientEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server to connect to, as `host:port`.
    pub server_addr: String,
    /// Rate of the worker loop and the outbound writer.
    pub tick_rate_hz: u32,
    /// Upper bound on a single TCP connect attempt.
    pub connect_attempt_timeout: Duration,
    /// Pause between failed connect attempts.
    pub reconnect_delay: Duration,
    /// Unread frames kept from the server. Older ones are overwritten.
    pub inbound_capacity: usize,
    /// Unsent frames queued for the server.
    pub outbound_capacity: usize,
    pub shutdown: ShutdownPolicy,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig::with_rate(self.tick_rate_hz)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_ADDR.to_owned(),
            tick_rate_hz: TickConfig::DEFAULT_TICK_RATE_HZ,
            connect_attempt_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(500),
            inbound_capacity: 1,
            outbound_capacity: 1,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

/// Configuration for a [`ServerEngine`](crate::ServerEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port; see
    /// [`ServerEngine::local_addr`](crate::ServerEngine::local_addr).
    pub bind_addr: String,
    /// Rate of the accept loop and the broadcast fan-out.
    pub tick_rate_hz: u32,
    /// Lobby requests waiting for the handler thread.
    pub request_queue_capacity: usize,
    /// How long a single write into a full mailbox may wait before the
    /// engine retries or gives up.
    pub response_patience: Duration,
    /// How long the handler thread waits for a request before it
    /// re-checks the server state.
    pub handler_poll: Duration,
    /// How long a broadcast to one client may take. A client that does
    /// not take the frame in time is disconnected.
    pub send_timeout: Duration,
    /// How long `start` waits for the listener to come up.
    pub startup_timeout: Duration,
    pub shutdown: ShutdownPolicy,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig::with_rate(self.tick_rate_hz)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_owned(),
            tick_rate_hz: TickConfig::DEFAULT_TICK_RATE_HZ,
            request_queue_capacity: 64,
            response_patience: Duration::from_millis(100),
            handler_poll: Duration::from_millis(50),
            send_timeout: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(5),
            shutdown: ShutdownPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::new("10.0.0.1:9000");
        assert_eq!(config.server_addr, "10.0.0.1:9000");
        assert_eq!(config.tick_rate_hz, 50);
        assert_eq!(config.connect_attempt_timeout, Duration::from_secs(1));
        assert_eq!(config.inbound_capacity, 1);
        assert_eq!(config.outbound_capacity, 1);
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, DEFAULT_ADDR);
        assert_eq!(config.request_queue_capacity, 64);
        assert_eq!(config.handler_poll, Duration::from_millis(50));
        assert_eq!(config.send_timeout, Duration::from_millis(500));
        assert_eq!(config.tick_config().tick_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_server_config_serde_round_trip() {
        let config = ServerConfig::new("0.0.0.0:0");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<ServerConfig>(&json).unwrap(), config);
    }
}
