//! Gateway-wide delivery counters.
//!
//! One [`StreamMetrics`] is created per gateway and shared by `Arc` with
//! every path that records counts. Each update is also mirrored to the
//! `metrics` facade so an installed Prometheus recorder exports it.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;

/// Frames delivered to connections (counter).
pub const MESSAGES_TOTAL: &str = "vigil_messages_total";
/// Bytes delivered to connections (counter).
pub const BYTES_TOTAL: &str = "vigil_bytes_total";
/// Frames or records dropped under backpressure (counter).
pub const DROPPED_TOTAL: &str = "vigil_dropped_total";
/// Connected observers (gauge).
pub const CONNECTIONS_ACTIVE: &str = "vigil_connections_active";
/// Batches cut from channel buffers (counter).
pub const BATCHES_TOTAL: &str = "vigil_batches_total";
/// Events accepted by the gateway (counter).
pub const EVENTS_PUBLISHED_TOTAL: &str = "vigil_events_published_total";

/// Monotonic counters, reset only on restart.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    dropped_messages: AtomicU64,
    active_connections: AtomicU64,
    batches_flushed: AtomicU64,
    events_published: AtomicU64,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Frames delivered.
    pub total_messages: u64,
    /// Bytes delivered.
    pub total_bytes: u64,
    /// Frames or records dropped.
    pub dropped_messages: u64,
    /// Connected observers.
    pub active_connections: u64,
    /// Batches cut.
    pub batches_flushed: u64,
    /// Events accepted.
    pub events_published: u64,
}

impl StreamMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// An event entered the gateway.
    pub fn record_published(&self) {
        let _ = self.events_published.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
    }

    /// A batch was cut from a channel buffer.
    pub fn record_batch(&self) {
        let _ = self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        counter!(BATCHES_TOTAL).increment(1);
    }

    /// `messages` frames totalling `bytes` were handed to connections.
    pub fn record_sent(&self, messages: u64, bytes: u64) {
        if messages == 0 {
            return;
        }
        let _ = self.total_messages.fetch_add(messages, Ordering::Relaxed);
        let _ = self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        counter!(MESSAGES_TOTAL).increment(messages);
        counter!(BYTES_TOTAL).increment(bytes);
    }

    /// `count` frames or records were dropped.
    pub fn record_dropped(&self, count: u64) {
        if count == 0 {
            return;
        }
        let _ = self.dropped_messages.fetch_add(count, Ordering::Relaxed);
        counter!(DROPPED_TOTAL).increment(count);
    }

    /// An observer connected.
    pub fn connection_opened(&self) {
        let _ = self.active_connections.fetch_add(1, Ordering::Relaxed);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    }

    /// An observer disconnected.
    pub fn connection_closed(&self) {
        let previous = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if previous.is_ok() {
            gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        }
    }

    /// Copy all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_accumulate() {
        let m = StreamMetrics::new();
        m.record_published();
        m.record_batch();
        m.record_sent(3, 300);
        m.record_sent(0, 999);
        m.record_dropped(2);
        let s = m.snapshot();
        assert_eq!(s.events_published, 1);
        assert_eq!(s.batches_flushed, 1);
        assert_eq!(s.total_messages, 3);
        assert_eq!(s.total_bytes, 300);
        assert_eq!(s.dropped_messages, 2);
    }

    #[test]
    fn active_connections_never_underflow() {
        let m = StreamMetrics::new();
        m.connection_opened();
        m.connection_closed();
        m.connection_closed();
        assert_eq!(m.snapshot().active_connections, 0);
    }

    #[test]
    fn concurrent_updates_are_counted() {
        let m = Arc::new(StreamMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_sent(1, 10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = m.snapshot();
        assert_eq!(s.total_messages, 8000);
        assert_eq!(s.total_bytes, 80_000);
    }

    #[test]
    fn snapshot_is_camel_case() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        for key in [
            "totalMessages",
            "totalBytes",
            "droppedMessages",
            "activeConnections",
            "batchesFlushed",
            "eventsPublished",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn metric_names_are_snake_case() {
        for name in [
            MESSAGES_TOTAL,
            BYTES_TOTAL,
            DROPPED_TOTAL,
            CONNECTIONS_ACTIVE,
            BATCHES_TOTAL,
            EVENTS_PUBLISHED_TOTAL,
        ] {
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
