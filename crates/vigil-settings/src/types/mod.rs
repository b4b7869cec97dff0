//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may name any subset of fields.

mod server;
mod stream;

pub use server::*;
pub use stream::*;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vigil_core::channels;

/// Smallest accepted flush interval in milliseconds.
pub const MIN_FLUSH_INTERVAL_MS: u64 = 10;

/// Root settings document.
///
/// ```json
/// {
///   "stream": { "bufferSize": 20, "channels": ["thoughts", "tools"] },
///   "intervention": { "approvalTimeoutMs": 30000, "onTimeout": "deny" },
///   "server": { "port": 9000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Channel buffering and compression.
    pub stream: StreamSettings,
    /// Intervention gate policy.
    pub intervention: InterventionSettings,
    /// Durable store.
    pub persistence: PersistenceSettings,
    /// WebSocket server.
    pub server: ServerSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl VigilSettings {
    /// Clamp out-of-range values and normalize the channel list.
    ///
    /// Returns the number of adjustments made; each one is logged.
    pub fn validate(&mut self) -> usize {
        let mut fixes = 0;
        let stream = &mut self.stream;

        if stream.buffer_size == 0 {
            warn!("stream.bufferSize must be at least 1, using 1");
            stream.buffer_size = 1;
            fixes += 1;
        }
        if stream.flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            warn!(
                value = stream.flush_interval_ms,
                "stream.flushIntervalMs below minimum, using {MIN_FLUSH_INTERVAL_MS}"
            );
            stream.flush_interval_ms = MIN_FLUSH_INTERVAL_MS;
            fixes += 1;
        }

        let before = stream.channels.len();
        let mut seen = std::collections::HashSet::new();
        stream
            .channels
            .retain(|name| !name.is_empty() && seen.insert(name.clone()));
        if stream.channels.len() != before {
            warn!(
                removed = before - stream.channels.len(),
                "dropped empty or duplicate channel names"
            );
            fixes += 1;
        }
        if stream.channels.is_empty() {
            warn!("no channels configured, restoring defaults");
            stream.channels = channels::DEFAULT.iter().map(|c| (*c).to_string()).collect();
            fixes += 1;
        }

        if self.server.send_queue_capacity == 0 {
            warn!("server.sendQueueCapacity must be at least 1, using 1");
            self.server.send_queue_capacity = 1;
            fixes += 1;
        }
        if self.persistence.queue_capacity == 0 {
            warn!("persistence.queueCapacity must be at least 1, using 1");
            self.persistence.queue_capacity = 1;
            fixes += 1;
        }
        fixes
    }
}
