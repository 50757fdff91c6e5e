//! Server and logging settings.

use serde::{Deserialize, Serialize};

/// Network, connection and keepalive settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// `WebSocket`/HTTP port.
    pub port: u16,
    /// Maximum concurrent `WebSocket` connections.
    pub max_connections: usize,
    /// Maximum inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Delay before the first keepalive ping, in milliseconds.
    pub keepalive_initial_delay_ms: u64,
    /// Interval between keepalive pings, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Outbound frame queue depth per connection.
    pub send_queue_capacity: usize,
    /// Pending `run` commands queued per connection.
    pub command_queue_capacity: usize,
    /// How long a closing session waits for the client's close reply, in
    /// milliseconds.
    pub close_timeout_ms: u64,
    /// Grace period for in-flight tasks on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 256,
            max_message_size: 1024 * 1024,
            keepalive_initial_delay_ms: 5_000,
            keepalive_interval_ms: 30_000,
            send_queue_capacity: 64,
            command_queue_capacity: 8,
            close_timeout_ms: 5_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format: `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}
