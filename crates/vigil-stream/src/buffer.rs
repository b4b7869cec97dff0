//! Per-channel FIFO buffers.
//!
//! Channels are fixed at construction. Each channel has its own lock, so
//! appends and drains on one channel are mutually exclusive while different
//! channels never contend. Only [`ChannelBuffers::enqueue`] appends and only
//! a flush drains; an item is therefore part of exactly one batch.
//!
//! The `*_with` variants hand each batch to a delivery callback while the
//! channel's delivery lock is held. That lock is taken before draining, so
//! batches of one channel reach the callback in sequence order even when
//! several threads flush the same channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::time::Instant;
use tracing::{debug, warn};
use vigil_core::TelemetryEvent;
use vigil_core::events::now_timestamp;

use crate::codec::{self, Codec, StoredForm};
use crate::errors::CodecError;

/// One event waiting in a channel buffer.
#[derive(Debug)]
pub struct BufferedItem {
    /// The event as published.
    pub event: Arc<TelemetryEvent>,
    /// Encoded (possibly compressed) form.
    pub stored: StoredForm,
    /// When the item was appended.
    pub enqueued_at: Instant,
}

impl BufferedItem {
    /// Restore the item's original encoding as embeddable JSON.
    ///
    /// If the stored form cannot be restored the event is re-encoded, so a
    /// codec failure never loses an item.
    fn to_json(&self) -> Option<Box<RawValue>> {
        let restored = self
            .stored
            .restore()
            .and_then(|bytes| codec::to_raw_json(&bytes));
        match restored {
            Ok(raw) => Some(raw),
            Err(error) => {
                warn!(%error, event_id = %self.event.id, "restore failed, re-encoding event");
                match serde_json::value::to_raw_value(&*self.event) {
                    Ok(raw) => Some(raw),
                    Err(error) => {
                        warn!(%error, event_id = %self.event.id, "event cannot be encoded, skipping");
                        None
                    }
                }
            }
        }
    }
}

/// Items released together by one flush.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Channel the items were buffered on.
    pub channel: String,
    /// Per-channel flush counter, starting at 0.
    pub sequence: u64,
    /// Items in enqueue order.
    pub items: Vec<Box<RawValue>>,
    /// Number of items.
    pub count: usize,
    /// When the batch was cut.
    pub timestamp: String,
}

/// Result of [`ChannelBuffers::enqueue`].
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// The item is buffered; `pending` items now wait on the channel.
    Buffered {
        /// Buffer length after the append.
        pending: usize,
    },
    /// The append filled the buffer and the channel was flushed eagerly.
    Flushed(Batch),
    /// The event names a channel that is not configured; nothing was stored.
    UnknownChannel,
}

#[derive(Debug)]
struct ChannelState {
    items: VecDeque<BufferedItem>,
    last_flush_at: Instant,
    next_sequence: u64,
}

/// Items moved out of a channel under its lock, not yet restored.
struct Drained {
    channel: String,
    sequence: u64,
    items: Vec<BufferedItem>,
}

impl Drained {
    fn into_batch(self) -> Batch {
        let items: Vec<Box<RawValue>> = self.items.iter().filter_map(BufferedItem::to_json).collect();
        Batch {
            count: items.len(),
            channel: self.channel,
            sequence: self.sequence,
            items,
            timestamp: now_timestamp(),
        }
    }
}

/// One channel's buffer and its delivery turnstile.
///
/// Lock order is `delivery` then `state`.
#[derive(Debug)]
struct ChannelSlot {
    state: Mutex<ChannelState>,
    delivery: Mutex<()>,
}

/// The fixed set of channel buffers.
pub struct ChannelBuffers {
    names: Vec<String>,
    channels: HashMap<String, ChannelSlot>,
    codec: Codec,
    buffer_size: usize,
}

impl ChannelBuffers {
    /// Create one empty buffer per name. Duplicate names collapse.
    pub fn new<I, S>(names: I, codec: Codec, buffer_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Instant::now();
        let mut ordered = Vec::new();
        let mut channels = HashMap::new();
        for name in names {
            let name = name.into();
            if channels.contains_key(&name) {
                continue;
            }
            let _ = channels.insert(
                name.clone(),
                ChannelSlot {
                    state: Mutex::new(ChannelState {
                        items: VecDeque::new(),
                        last_flush_at: now,
                        next_sequence: 0,
                    }),
                    delivery: Mutex::new(()),
                },
            );
            ordered.push(name);
        }
        Self {
            names: ordered,
            channels,
            codec,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Configured channel names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `channel` is configured.
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Items per channel that trigger an eager flush.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Append an event to its channel.
    ///
    /// Encoding and compression happen before the channel lock is taken.
    /// When the append brings the buffer to `buffer_size` items the channel
    /// is drained inside the same critical section, so no later append can
    /// slip in ahead of the flush.
    pub fn enqueue(&self, event: Arc<TelemetryEvent>) -> Result<EnqueueOutcome, CodecError> {
        self.enqueue_with(event, |_| {})
    }

    /// [`enqueue`](Self::enqueue), passing an eager flush to `deliver`
    /// before any later batch of the same channel can be cut.
    pub fn enqueue_with<F>(
        &self,
        event: Arc<TelemetryEvent>,
        deliver: F,
    ) -> Result<EnqueueOutcome, CodecError>
    where
        F: FnOnce(&Batch),
    {
        let channel = event.channel();
        let Some(slot) = self.channels.get(channel) else {
            warn!(channel, event_id = %event.id, "enqueue to unknown channel ignored");
            return Ok(EnqueueOutcome::UnknownChannel);
        };

        let stored = self.codec.store(codec::encode(&*event)?);
        let item = BufferedItem {
            event: Arc::clone(&event),
            stored,
            enqueued_at: Instant::now(),
        };

        let _turn = slot.delivery.lock();
        let drained = {
            let mut state = slot.state.lock();
            state.items.push_back(item);
            if state.items.len() < self.buffer_size {
                return Ok(EnqueueOutcome::Buffered {
                    pending: state.items.len(),
                });
            }
            drain(channel, &mut state, Instant::now())
        };
        debug!(channel, count = drained.items.len(), "buffer full, eager flush");
        let batch = drained.into_batch();
        deliver(&batch);
        Ok(EnqueueOutcome::Flushed(batch))
    }

    /// Drain `channel` unconditionally.
    ///
    /// Returns `None` for an empty or unknown channel.
    pub fn flush(&self, channel: &str) -> Option<Batch> {
        self.flush_with(channel, |_| {})
    }

    /// [`flush`](Self::flush), passing the batch to `deliver` in sequence
    /// order.
    pub fn flush_with<F>(&self, channel: &str, deliver: F) -> Option<Batch>
    where
        F: FnOnce(&Batch),
    {
        self.drain_and_deliver(channel, Instant::now(), |_| true, deliver)
    }

    /// Drain `channel` if it holds items and `interval` has elapsed since its
    /// last flush.
    pub fn flush_if_stale(&self, channel: &str, interval: Duration, now: Instant) -> Option<Batch> {
        self.flush_if_stale_with(channel, interval, now, |_| {})
    }

    /// [`flush_if_stale`](Self::flush_if_stale), passing the batch to
    /// `deliver` in sequence order.
    pub fn flush_if_stale_with<F>(
        &self,
        channel: &str,
        interval: Duration,
        now: Instant,
        deliver: F,
    ) -> Option<Batch>
    where
        F: FnOnce(&Batch),
    {
        self.drain_and_deliver(
            channel,
            now,
            |state| now.saturating_duration_since(state.last_flush_at) >= interval,
            deliver,
        )
    }

    /// Drain every non-empty channel.
    pub fn flush_all(&self) -> Vec<Batch> {
        self.flush_all_with(|_| {})
    }

    /// [`flush_all`](Self::flush_all), passing each batch to `deliver`.
    pub fn flush_all_with<F>(&self, mut deliver: F) -> Vec<Batch>
    where
        F: FnMut(&Batch),
    {
        self.names
            .iter()
            .filter_map(|name| self.flush_with(name, &mut deliver))
            .collect()
    }

    fn drain_and_deliver<P, F>(
        &self,
        channel: &str,
        now: Instant,
        due: P,
        deliver: F,
    ) -> Option<Batch>
    where
        P: FnOnce(&ChannelState) -> bool,
        F: FnOnce(&Batch),
    {
        let slot = self.channels.get(channel)?;
        let _turn = slot.delivery.lock();
        let drained = {
            let mut state = slot.state.lock();
            if state.items.is_empty() || !due(&state) {
                return None;
            }
            drain(channel, &mut state, now)
        };
        let batch = drained.into_batch();
        deliver(&batch);
        Some(batch)
    }

    /// The newest `n` items of `channel`, oldest first, without removing them.
    pub fn tail(&self, channel: &str, n: usize) -> Vec<Box<RawValue>> {
        let Some(slot) = self.channels.get(channel) else {
            return Vec::new();
        };
        let state = slot.state.lock();
        let skip = state.items.len().saturating_sub(n);
        state
            .items
            .iter()
            .skip(skip)
            .filter_map(BufferedItem::to_json)
            .collect()
    }

    /// Items currently waiting on `channel`.
    pub fn pending(&self, channel: &str) -> Option<usize> {
        self.channels.get(channel).map(|slot| slot.state.lock().items.len())
    }
}

fn drain(channel: &str, state: &mut ChannelState, now: Instant) -> Drained {
    let sequence = state.next_sequence;
    state.next_sequence += 1;
    state.last_flush_at = now;
    Drained {
        channel: channel.to_owned(),
        sequence,
        items: state.items.drain(..).collect(),
    }
}
