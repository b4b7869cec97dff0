//! Subscription registry: who listens to which channel and subject room.
//!
//! Connection bookkeeping and the per-channel / per-subject member sets are
//! kept under one lock so a connection's own view and the room views can
//! never disagree. Recipient lists handed out are snapshots: a connection
//! that unsubscribes after a snapshot was taken still receives that one
//! delivery.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use vigil_core::events::now_timestamp;
use vigil_core::{ConnectionId, SubjectKey, SubjectKind, TelemetryEvent};

/// Per-connection delivery counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    messages: AtomicU64,
    bytes: AtomicU64,
}

impl ConnectionStats {
    fn record(&self, bytes: usize) {
        let _ = self.messages.fetch_add(1, Ordering::Relaxed);
        let _ = self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    channels: BTreeSet<String>,
    subjects: BTreeSet<SubjectKey>,
    connected_at: String,
    stats: Arc<ConnectionStats>,
}

#[derive(Debug)]
struct SubjectTracker {
    created_at: String,
    event_count: u64,
    last_event_at: Option<String>,
    recent: VecDeque<Arc<TelemetryEvent>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channel_members: HashMap<String, HashSet<ConnectionId>>,
    subject_rooms: HashMap<SubjectKey, HashSet<ConnectionId>>,
    trackers: HashMap<SubjectKey, SubjectTracker>,
}

/// Snapshot of one connection's memberships.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Subscribed channels.
    pub channels: Vec<String>,
    /// Subscribed subject keys.
    pub subjects: Vec<SubjectKey>,
    /// Connect time.
    pub connected_at: String,
    /// Frames delivered.
    pub messages: u64,
    /// Bytes delivered.
    pub bytes: u64,
}

/// Tracking state of one subject, as reported to observers.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatus {
    /// Subject key in wire form.
    pub subject: SubjectKey,
    /// Subject family.
    pub kind: SubjectKind,
    /// Whether tracking state exists (someone has subscribed at least once).
    pub tracked: bool,
    /// Current room size.
    pub subscribers: usize,
    /// Events recorded since tracking started.
    pub event_count: u64,
    /// Timestamp of the newest recorded event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<String>,
    /// When tracking started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_since: Option<String>,
    /// Most recent events, oldest first.
    pub recent_events: Vec<Arc<TelemetryEvent>>,
}

/// What [`SubscriptionRegistry::teardown`] removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Channels the connection had joined.
    pub channels: usize,
    /// Subject rooms the connection had joined.
    pub subjects: usize,
}

/// Channel and subject-room membership for every live connection.
pub struct SubscriptionRegistry {
    known_channels: HashSet<String>,
    subject_history_limit: usize,
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Registry accepting subscriptions to `channels` only.
    pub fn new<I, S>(channels: I, subject_history_limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known_channels: HashSet<String> = channels.into_iter().map(Into::into).collect();
        let state = RegistryState {
            channel_members: known_channels
                .iter()
                .map(|name| (name.clone(), HashSet::new()))
                .collect(),
            ..RegistryState::default()
        };
        Self {
            known_channels,
            subject_history_limit,
            state: RwLock::new(state),
        }
    }

    /// Start bookkeeping for a new connection. Returns `false` if the id is
    /// already registered.
    pub fn register(&self, conn: &ConnectionId) -> bool {
        let mut state = self.state.write();
        if state.connections.contains_key(conn) {
            return false;
        }
        let _ = state.connections.insert(
            conn.clone(),
            ConnectionEntry {
                channels: BTreeSet::new(),
                subjects: BTreeSet::new(),
                connected_at: now_timestamp(),
                stats: Arc::new(ConnectionStats::default()),
            },
        );
        true
    }

    /// Join `conn` to `channel`. Unknown channels and unregistered
    /// connections are ignored with a warning.
    ///
    /// Returns `true` if membership changed.
    pub fn subscribe_channel(&self, conn: &ConnectionId, channel: &str) -> bool {
        if !self.known_channels.contains(channel) {
            warn!(conn_id = %conn, channel, "subscribe to unknown channel ignored");
            return false;
        }
        let mut state = self.state.write();
        let state = &mut *state;
        let Some(entry) = state.connections.get_mut(conn) else {
            warn!(conn_id = %conn, channel, "subscribe from unregistered connection ignored");
            return false;
        };
        let joined = entry.channels.insert(channel.to_owned());
        if let Some(members) = state.channel_members.get_mut(channel) {
            let _ = members.insert(conn.clone());
        }
        debug!(conn_id = %conn, channel, joined, "channel subscription");
        joined
    }

    /// Remove `conn` from `channel`. Returns `true` if it was a member.
    pub fn unsubscribe_channel(&self, conn: &ConnectionId, channel: &str) -> bool {
        let mut state = self.state.write();
        let state = &mut *state;
        let left = state
            .connections
            .get_mut(conn)
            .is_some_and(|entry| entry.channels.remove(channel));
        if let Some(members) = state.channel_members.get_mut(channel) {
            let _ = members.remove(conn);
        }
        left
    }

    /// Join `conn` to the room of `subject`, creating the subject's tracking
    /// state on first use.
    pub fn subscribe_subject(&self, conn: &ConnectionId, subject: &SubjectKey) -> bool {
        let mut state = self.state.write();
        let state = &mut *state;
        let Some(entry) = state.connections.get_mut(conn) else {
            warn!(conn_id = %conn, %subject, "subscribe from unregistered connection ignored");
            return false;
        };
        let joined = entry.subjects.insert(subject.clone());
        let _ = state
            .subject_rooms
            .entry(subject.clone())
            .or_default()
            .insert(conn.clone());
        let _ = state
            .trackers
            .entry(subject.clone())
            .or_insert_with(|| SubjectTracker {
                created_at: now_timestamp(),
                event_count: 0,
                last_event_at: None,
                recent: VecDeque::new(),
            });
        debug!(conn_id = %conn, %subject, joined, "subject subscription");
        joined
    }

    /// Remove `conn` from the room of `subject`.
    pub fn unsubscribe_subject(&self, conn: &ConnectionId, subject: &SubjectKey) -> bool {
        let mut state = self.state.write();
        let state = &mut *state;
        let left = state
            .connections
            .get_mut(conn)
            .is_some_and(|entry| entry.subjects.remove(subject));
        remove_from_room(&mut state.subject_rooms, subject, conn);
        left
    }

    /// Remove every membership of `conn` and forget it.
    ///
    /// Returns `None` if the connection was not registered.
    pub fn teardown(&self, conn: &ConnectionId) -> Option<TeardownSummary> {
        let mut state = self.state.write();
        let state = &mut *state;
        let entry = state.connections.remove(conn)?;
        for channel in &entry.channels {
            if let Some(members) = state.channel_members.get_mut(channel) {
                let _ = members.remove(conn);
            }
        }
        for subject in &entry.subjects {
            remove_from_room(&mut state.subject_rooms, subject, conn);
        }
        Some(TeardownSummary {
            channels: entry.channels.len(),
            subjects: entry.subjects.len(),
        })
    }

    /// Snapshot of `channel`'s subscribers.
    pub fn channel_subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .channel_members
            .get(channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the room of `subject`.
    pub fn subject_subscribers(&self, subject: &SubjectKey) -> Vec<ConnectionId> {
        self.state
            .read()
            .subject_rooms
            .get(subject)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record `event` against its subject's tracking state (if tracked) and
    /// return the subject room's current members.
    pub fn route_subject_event(&self, event: &Arc<TelemetryEvent>) -> Vec<ConnectionId> {
        let Some(subject) = &event.subject else {
            return Vec::new();
        };
        let mut state = self.state.write();
        if let Some(tracker) = state.trackers.get_mut(subject) {
            tracker.event_count += 1;
            tracker.last_event_at = Some(event.timestamp.clone());
            if self.subject_history_limit > 0 {
                if tracker.recent.len() == self.subject_history_limit {
                    let _ = tracker.recent.pop_front();
                }
                tracker.recent.push_back(Arc::clone(event));
            }
        }
        state
            .subject_rooms
            .get(subject)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current tracking state of `subject`.
    pub fn subject_status(&self, subject: &SubjectKey) -> SubjectStatus {
        let state = self.state.read();
        let subscribers = state.subject_rooms.get(subject).map_or(0, HashSet::len);
        let tracker = state.trackers.get(subject);
        SubjectStatus {
            subject: subject.clone(),
            kind: subject.kind(),
            tracked: tracker.is_some(),
            subscribers,
            event_count: tracker.map_or(0, |t| t.event_count),
            last_event_at: tracker.and_then(|t| t.last_event_at.clone()),
            tracked_since: tracker.map(|t| t.created_at.clone()),
            recent_events: tracker
                .map(|t| t.recent.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    /// Count one delivered frame of `bytes` for each of `conns`.
    pub fn record_delivery(&self, conns: &[ConnectionId], bytes: usize) {
        if conns.is_empty() {
            return;
        }
        let state = self.state.read();
        for conn in conns {
            if let Some(entry) = state.connections.get(conn) {
                entry.stats.record(bytes);
            }
        }
    }

    /// Memberships and counters of `conn`.
    pub fn connection_info(&self, conn: &ConnectionId) -> Option<ConnectionInfo> {
        let state = self.state.read();
        let entry = state.connections.get(conn)?;
        Some(ConnectionInfo {
            id: conn.clone(),
            channels: entry.channels.iter().cloned().collect(),
            subjects: entry.subjects.iter().cloned().collect(),
            connected_at: entry.connected_at.clone(),
            messages: entry.stats.messages.load(Ordering::Relaxed),
            bytes: entry.stats.bytes.load(Ordering::Relaxed),
        })
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<SubjectKey, HashSet<ConnectionId>>,
    subject: &SubjectKey,
    conn: &ConnectionId,
) {
    if let Some(members) = rooms.get_mut(subject) {
        let _ = members.remove(conn);
        if members.is_empty() {
            let _ = rooms.remove(subject);
        }
    }
}
