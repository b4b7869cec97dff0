//! Stream engine and intervention settings.

use serde::{Deserialize, Serialize};
use vigil_core::channels;

/// Channel buffering, compression and history settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Compress buffered items above the threshold.
    pub compression_enabled: bool,
    /// Encoded size (bytes) above which an item is compressed.
    pub compression_threshold_bytes: usize,
    /// Items per channel that trigger an eager flush.
    pub buffer_size: usize,
    /// Flush scheduler period and staleness threshold in milliseconds.
    pub flush_interval_ms: u64,
    /// Fixed set of channel names.
    pub channels: Vec<String>,
    /// Items per channel sent in the connect handshake.
    pub initial_tail_items: usize,
    /// Recent events kept per tracked subject.
    pub subject_history_limit: usize,
    /// Events kept in the in-memory history log.
    pub history_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            compression_threshold_bytes: 1024,
            buffer_size: 50,
            flush_interval_ms: 100,
            channels: channels::DEFAULT.iter().map(|c| (*c).to_string()).collect(),
            initial_tail_items: 10,
            subject_history_limit: 50,
            history_capacity: 1000,
        }
    }
}

/// What happens to a pending approval when its timeout elapses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Reject the execution.
    #[default]
    Deny,
    /// Let the execution proceed with its original parameters.
    Allow,
}

/// Intervention gate settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterventionSettings {
    /// How long a paused execution waits for a decision; `None` waits forever.
    pub approval_timeout_ms: Option<u64>,
    /// Decision applied when the timeout elapses.
    pub on_timeout: TimeoutPolicy,
}
