//! Bounded in-memory log of recently published events.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vigil_core::{EventKind, SubjectKey, TelemetryEvent};

/// Results returned when a query names no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Filter for `request:history`. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryFilter {
    /// Only events buffered on this channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Only events scoped to this subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectKey>,
    /// Only events of this kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    /// Only events stamped strictly after this RFC 3339 instant. Any offset
    /// is accepted; comparison is by instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<FixedOffset>>,
    /// Newest N matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, event: &TelemetryEvent) -> bool {
        self.channel.as_deref().is_none_or(|c| event.channel() == c)
            && self
                .subject
                .as_ref()
                .is_none_or(|s| event.subject.as_ref() == Some(s))
            && self.kind.is_none_or(|k| event.kind == k)
            && self.since.is_none_or(|since| {
                DateTime::parse_from_rfc3339(&event.timestamp).is_ok_and(|at| at > since)
            })
    }
}

/// Ring buffer of the newest `capacity` events.
pub struct HistoryLog {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<TelemetryEvent>>>,
}

impl HistoryLog {
    /// Log keeping at most `capacity` events. Zero disables recording.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    /// Record an event, evicting the oldest when full.
    pub fn push(&self, event: Arc<TelemetryEvent>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back(event);
    }

    /// Matching events, oldest first, keeping only the newest `limit`.
    pub fn query(&self, filter: &HistoryFilter) -> Vec<Arc<TelemetryEvent>> {
        let limit = filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 {
            return Vec::new();
        }
        let entries = self.entries.lock();
        let mut newest_first: Vec<_> = entries
            .iter()
            .rev()
            .filter(|event| filter.matches(event))
            .take(limit)
            .cloned()
            .collect();
        newest_first.reverse();
        newest_first
    }

    /// Events currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_at(kind: EventKind, ts: &str, n: u64) -> Arc<TelemetryEvent> {
        let mut event = TelemetryEvent::new(kind, json!({ "n": n }));
        event.timestamp = ts.to_owned();
        Arc::new(event)
    }

    fn instant(ts: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(ts).unwrap()
    }

    fn numbers(events: &[Arc<TelemetryEvent>]) -> Vec<u64> {
        events.iter().map(|e| e.data["n"].as_u64().unwrap()).collect()
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = HistoryLog::new(3);
        for n in 0..5 {
            log.push(event_at(EventKind::AgentThought, "2026-01-01T00:00:00.000Z", n));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(numbers(&log.query(&HistoryFilter::default())), vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let log = HistoryLog::new(0);
        log.push(event_at(EventKind::AgentThought, "t", 0));
        assert!(log.is_empty());
    }

    #[test]
    fn filters_combine() {
        let log = HistoryLog::new(100);
        log.push(event_at(EventKind::AgentThought, "2026-01-01T00:00:01.000Z", 1));
        log.push(event_at(EventKind::ToolExecution, "2026-01-01T00:00:02.000Z", 2));
        log.push(event_at(EventKind::AgentThought, "2026-01-01T00:00:03.000Z", 3));
        log.push(Arc::new(
            TelemetryEvent::agent_thought("a1", json!({ "n": 4 })),
        ));

        let by_kind = HistoryFilter {
            kind: Some(EventKind::AgentThought),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&by_kind)), vec![1, 3, 4]);

        let by_channel = HistoryFilter {
            channel: Some("tools".into()),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&by_channel)), vec![2]);

        let since = HistoryFilter {
            since: Some(instant("2026-01-01T00:00:01.000Z")),
            kind: Some(EventKind::AgentThought),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&since)), vec![3, 4]);

        let by_subject = HistoryFilter {
            subject: Some(SubjectKey::agent_thoughts("a1")),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&by_subject)), vec![4]);
    }

    #[test]
    fn since_compares_instants_across_offsets() {
        let log = HistoryLog::new(10);
        log.push(event_at(EventKind::AgentThought, "2026-01-01T00:00:00.500Z", 1));
        log.push(event_at(EventKind::AgentThought, "2026-01-01T00:00:02.000Z", 2));
        log.push(event_at(EventKind::AgentThought, "not a timestamp", 3));

        // 01:00:01+01:00 is 00:00:01Z.
        let filter: HistoryFilter =
            serde_json::from_value(json!({ "since": "2026-01-01T01:00:01+01:00" })).unwrap();
        assert_eq!(numbers(&log.query(&filter)), vec![2]);

        let filter = HistoryFilter {
            since: Some(instant("2025-12-31T23:00:00-01:00")),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&filter)), vec![1, 2]);

        assert!(serde_json::from_value::<HistoryFilter>(json!({ "since": "yesterday" })).is_err());
    }

    #[test]
    fn limit_keeps_newest() {
        let log = HistoryLog::new(100);
        for n in 0..10 {
            log.push(event_at(EventKind::PerformanceMetric, "t", n));
        }
        let filter = HistoryFilter {
            limit: Some(3),
            ..HistoryFilter::default()
        };
        assert_eq!(numbers(&log.query(&filter)), vec![7, 8, 9]);
    }

    #[test]
    fn filter_parses_from_wire() {
        let filter: HistoryFilter = serde_json::from_value(json!({
            "channel": "thoughts",
            "subject": "agentThoughts:a1",
            "kind": "agentThought",
            "limit": 5
        }))
        .unwrap();
        assert_eq!(filter.subject, Some(SubjectKey::agent_thoughts("a1")));
        assert_eq!(filter.limit, Some(5));
    }
}
