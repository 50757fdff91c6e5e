//! Server configuration.

use std::time::Duration;

use runbox_settings::ServerSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::session::SessionLimits;

/// Configuration for the runbox server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent `WebSocket` connections.
    pub max_connections: usize,
    /// Max `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Delay before the first keepalive ping, in milliseconds.
    pub keepalive_initial_delay_ms: u64,
    /// Interval between keepalive pings, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Outbound frame queue depth per connection.
    pub send_queue_capacity: usize,
    /// Pending `run` commands queued per connection.
    pub command_queue_capacity: usize,
    /// Wait for the client's close reply, in milliseconds.
    pub close_timeout_ms: u64,
    /// Grace period for background tasks on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_message_size: 1024 * 1024, // 1 MB
            keepalive_initial_delay_ms: 5_000,
            keepalive_interval_ms: 30_000,
            send_queue_capacity: 64,
            command_queue_capacity: 8,
            close_timeout_ms: 5_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            max_message_size: settings.max_message_size,
            keepalive_initial_delay_ms: settings.keepalive_initial_delay_ms,
            keepalive_interval_ms: settings.keepalive_interval_ms,
            send_queue_capacity: settings.send_queue_capacity,
            command_queue_capacity: settings.command_queue_capacity,
            close_timeout_ms: settings.close_timeout_ms,
            shutdown_timeout_ms: settings.shutdown_timeout_ms,
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Delay before the first keepalive ping.
    pub fn keepalive_initial_delay(&self) -> Duration {
        Duration::from_millis(self.keepalive_initial_delay_ms)
    }

    /// Interval between keepalive pings.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Grace period on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Per-session limits derived from this config.
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            send_queue_capacity: self.send_queue_capacity.max(1),
            command_queue_capacity: self.command_queue_capacity.max(1),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn default_keepalive_schedule() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.keepalive_initial_delay(), Duration::from_secs(5));
        assert_eq!(cfg.keepalive_interval(), Duration::from_secs(30));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 9000,
            max_connections: 3,
            max_message_size: 2048,
            keepalive_initial_delay_ms: 100,
            keepalive_interval_ms: 200,
            send_queue_capacity: 4,
            command_queue_capacity: 2,
            close_timeout_ms: 300,
            shutdown_timeout_ms: 400,
        };
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.max_message_size, 2048);
        assert_eq!(cfg.keepalive_initial_delay(), Duration::from_millis(100));
        assert_eq!(cfg.keepalive_interval(), Duration::from_millis(200));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(400));
        let limits = cfg.session_limits();
        assert_eq!(limits.send_queue_capacity, 4);
        assert_eq!(limits.command_queue_capacity, 2);
        assert_eq!(limits.close_timeout, Duration::from_millis(300));
    }

    #[test]
    fn zero_queue_capacity_is_clamped() {
        let cfg = ServerConfig {
            send_queue_capacity: 0,
            command_queue_capacity: 0,
            ..ServerConfig::default()
        };
        let limits = cfg.session_limits();
        assert_eq!(limits.send_queue_capacity, 1);
        assert_eq!(limits.command_queue_capacity, 1);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port":3000}"#).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.max_connections, 256);
    }
}
