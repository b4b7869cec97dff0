//! Server, persistence, and logging settings.

use serde::{Deserialize, Serialize};

/// WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Outbound frames queued per connection before drops start.
    pub send_queue_capacity: usize,
    /// Dropped frames after which a connection is disconnected.
    pub max_dropped_per_connection: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            send_queue_capacity: 256,
            max_dropped_per_connection: 100,
        }
    }
}

/// Durable store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    /// Forward events to the durable store.
    pub enabled: bool,
    /// `SQLite` database path.
    pub db_path: String,
    /// Records buffered ahead of the store writer before overflow drops.
    pub queue_capacity: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "vigil.db".to_string(),
            queue_capacity: 4096,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
