//! The dispatcher: routes published events to channel buffers, subject
//! rooms, and the durable store, and serves the client protocol.
//!
//! Channel delivery is batched; subject delivery is immediate. Both paths
//! complete before [`Gateway::publish`] returns. Persistence is handed to a
//! bounded queue and never waited on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use vigil_core::events::now_timestamp;
use vigil_core::{ConnectionId, EventKind, SubjectKey, TelemetryEvent, TelemetryRecord};
use vigil_settings::VigilSettings;

use crate::buffer::{Batch, ChannelBuffers};
use crate::codec::Codec;
use crate::errors::ProtocolError;
use crate::gate::{ExecutionRequest, GateDecision, InterventionGate};
use crate::history::HistoryLog;
use crate::interceptor::{EventSink, Interceptor};
use crate::metrics::StreamMetrics;
use crate::persistence::PersistenceQueue;
use crate::protocol::{
    ClientMessage, ErrorFrame, HistoryResponse, SystemStatus, batch_frame_type, encode_frame,
    frames,
};
use crate::registry::SubscriptionRegistry;
use crate::transport::{Delivery, DeliveryReport, Transport};

/// The event streaming gateway.
pub struct Gateway {
    buffers: ChannelBuffers,
    registry: SubscriptionRegistry,
    gate: InterventionGate,
    history: HistoryLog,
    transport: Arc<dyn Transport>,
    metrics: Arc<StreamMetrics>,
    persistence: Option<PersistenceQueue>,
    flush_interval: Duration,
    initial_tail_items: usize,
}

impl Gateway {
    /// Gateway over `transport`, configured from `settings`.
    pub fn new(
        settings: &VigilSettings,
        transport: Arc<dyn Transport>,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        let stream = &settings.stream;
        Self {
            buffers: ChannelBuffers::new(
                stream.channels.iter().cloned(),
                Codec::from_settings(stream),
                stream.buffer_size,
            ),
            registry: SubscriptionRegistry::new(
                stream.channels.iter().cloned(),
                stream.subject_history_limit,
            ),
            gate: InterventionGate::from_settings(&settings.intervention),
            history: HistoryLog::new(stream.history_capacity),
            transport,
            metrics,
            persistence: None,
            flush_interval: Duration::from_millis(stream.flush_interval_ms),
            initial_tail_items: stream.initial_tail_items,
        }
    }

    /// Forward every published event to `queue`.
    #[must_use]
    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    /// Subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Intervention gate.
    pub fn gate(&self) -> &InterventionGate {
        &self.gate
    }

    /// Delivery counters.
    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Recent event log.
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Interval after which a non-empty buffer is considered stale.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Interceptor publishing through this gateway.
    pub fn interceptor(self: &Arc<Self>) -> Interceptor {
        Interceptor::new(Arc::clone(self) as Arc<dyn EventSink>)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────

    /// Accept one event.
    pub fn publish(&self, event: TelemetryEvent) {
        let event = Arc::new(event);
        self.metrics.record_published();
        self.history.push(Arc::clone(&event));

        let outcome = self.buffers.enqueue_with(Arc::clone(&event), |batch| {
            let _ = self.deliver_batch(batch);
        });
        if let Err(error) = outcome {
            warn!(%error, event_id = %event.id, "event could not be buffered");
        }

        if event.subject.is_some() {
            self.emit_to_subject(&event);
        }

        if let Some(queue) = &self.persistence {
            let _ = queue.submit(TelemetryRecord::from(&*event));
        }
    }

    fn emit_to_subject(&self, event: &Arc<TelemetryEvent>) {
        let recipients = self.registry.route_subject_event(event);
        if recipients.is_empty() {
            return;
        }
        match encode_frame(event.event_name(), &**event) {
            Ok(frame) => {
                let _ = self.fan_out(&recipients, &frame);
            }
            Err(error) => warn!(%error, event_id = %event.id, "subject frame could not be encoded"),
        }
    }

    /// Broadcast a batch to its channel's current subscribers.
    ///
    /// Returns the number of connections that accepted it.
    pub fn deliver_batch(&self, batch: &Batch) -> usize {
        self.metrics.record_batch();
        let recipients = self.registry.channel_subscribers(&batch.channel);
        debug!(
            channel = %batch.channel,
            sequence = batch.sequence,
            count = batch.count,
            recipients = recipients.len(),
            "delivering batch"
        );
        if recipients.is_empty() {
            return 0;
        }
        match encode_frame(&batch_frame_type(&batch.channel), batch) {
            Ok(frame) => self.fan_out(&recipients, &frame).delivered.len(),
            Err(error) => {
                warn!(%error, channel = %batch.channel, "batch frame could not be encoded");
                0
            }
        }
    }

    fn fan_out(&self, recipients: &[ConnectionId], frame: &Arc<str>) -> DeliveryReport {
        let report = self.transport.send_to_room(recipients, frame);
        let delivered = report.delivered.len() as u64;
        self.metrics.record_sent(delivered, delivered * frame.len() as u64);
        self.metrics.record_dropped(report.dropped as u64);
        self.registry.record_delivery(&report.delivered, frame.len());
        if report.dropped > 0 {
            debug!(dropped = report.dropped, "frames dropped by full connection queues");
        }
        report
    }

    fn send_to<T: Serialize + ?Sized>(&self, conn: &ConnectionId, kind: &str, data: &T) {
        let frame = match encode_frame(kind, data) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, kind, "frame could not be encoded");
                return;
            }
        };
        let len = frame.len();
        match self.transport.send_to_connection(conn, frame) {
            Delivery::Sent => {
                self.metrics.record_sent(1, len as u64);
                self.registry.record_delivery(std::slice::from_ref(conn), len);
            }
            Delivery::Dropped => self.metrics.record_dropped(1),
            Delivery::Closed => debug!(%conn, kind, "connection closed before reply"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Flushing
    // ─────────────────────────────────────────────────────────────────────

    /// Flush and deliver every channel whose items have waited at least the
    /// flush interval. Returns the number of batches cut.
    ///
    /// Batches are delivered under the channel's delivery lock, so they reach
    /// subscribers in sequence order even when a publisher flushes the same
    /// channel concurrently.
    pub fn flush_stale(&self, now: Instant) -> usize {
        self.buffers
            .names()
            .iter()
            .filter_map(|name| {
                self.buffers
                    .flush_if_stale_with(name, self.flush_interval, now, |batch| {
                        let _ = self.deliver_batch(batch);
                    })
            })
            .count()
    }

    /// Flush and deliver every non-empty channel.
    pub fn flush_all(&self) -> usize {
        self.buffers
            .flush_all_with(|batch| {
                let _ = self.deliver_batch(batch);
            })
            .len()
    }

    /// Items waiting on `channel`.
    pub fn pending(&self, channel: &str) -> Option<usize> {
        self.buffers.pending(channel)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────

    /// Register a new connection and send its handshake: aggregate status,
    /// the tail of every channel buffer, and the status of each subject in
    /// `subjects`. Returns `false` if the id was already connected.
    pub fn connect(&self, conn: &ConnectionId, subjects: &[SubjectKey]) -> bool {
        if !self.registry.register(conn) {
            warn!(%conn, "connection id already registered");
            return false;
        }
        self.metrics.connection_opened();
        info!(%conn, "observer connected");

        self.send_to(conn, frames::SYSTEM_STATUS, &self.status());

        let tails: BTreeMap<&str, Vec<Box<RawValue>>> = self
            .buffers
            .names()
            .iter()
            .map(|name| (name.as_str(), self.buffers.tail(name, self.initial_tail_items)))
            .collect();
        self.send_to(conn, frames::INITIAL_BUFFER_DATA, &tails);

        for subject in subjects {
            self.send_to(conn, frames::SUBJECT_STATUS, &self.registry.subject_status(subject));
        }
        true
    }

    /// Remove every membership of `conn`.
    pub fn disconnect(&self, conn: &ConnectionId) {
        if let Some(summary) = self.registry.teardown(conn) {
            self.metrics.connection_closed();
            info!(
                %conn,
                channels = summary.channels,
                subjects = summary.subjects,
                "observer disconnected"
            );
        }
    }

    /// Aggregate status.
    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            timestamp: now_timestamp(),
            active_connections: self.registry.connection_count(),
            available_channels: self.buffers.names().to_vec(),
            metrics: self.metrics.snapshot(),
            pending_interventions: self.gate.pending_count(),
        }
    }

    /// Handle one inbound text frame from `conn`.
    ///
    /// A request that cannot be honored is answered with an `error` frame;
    /// the connection itself is unaffected.
    #[instrument(skip_all, fields(conn = %conn))]
    pub fn handle_message(&self, conn: &ConnectionId, raw: &str) {
        let result = ClientMessage::parse(raw)
            .map_err(ProtocolError::from)
            .and_then(|message| self.handle_client_message(conn, message));
        if let Err(error) = result {
            debug!(%error, "client request rejected");
            let request = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
            self.send_to(
                conn,
                frames::ERROR,
                &ErrorFrame {
                    message: error.to_string(),
                    request,
                },
            );
        }
    }

    /// Apply a parsed client message.
    pub fn handle_client_message(
        &self,
        conn: &ConnectionId,
        message: ClientMessage,
    ) -> Result<(), ProtocolError> {
        match message {
            ClientMessage::SubscribeChannel { name } => {
                let _ = self.registry.subscribe_channel(conn, &name);
            }
            ClientMessage::UnsubscribeChannel { name } => {
                let _ = self.registry.unsubscribe_channel(conn, &name);
            }
            ClientMessage::SubscribeSubject(subject) => {
                let key = subject.key()?;
                if self.registry.subscribe_subject(conn, &key) {
                    self.send_to(conn, frames::SUBJECT_STATUS, &self.registry.subject_status(&key));
                }
            }
            ClientMessage::UnsubscribeSubject(subject) => {
                let _ = self.registry.unsubscribe_subject(conn, &subject.key()?);
            }
            ClientMessage::Approve(request) => {
                self.gate.approve(&request.execution_id, request.params)?;
            }
            ClientMessage::Reject(request) => {
                self.gate.reject(&request.execution_id, request.reason)?;
            }
            ClientMessage::Pause(tool) => self.gate.pause(&tool.agent_id, &tool.tool_id),
            ClientMessage::Resume(tool) => {
                let _ = self.gate.resume(&tool.agent_id, &tool.tool_id);
            }
            ClientMessage::History(filter) => {
                let events = self.history.query(&filter);
                let response = HistoryResponse {
                    count: events.len(),
                    events,
                    filter,
                };
                self.send_to(conn, frames::HISTORY_RESPONSE, &response);
            }
            ClientMessage::SubjectStatus(subject) => {
                let status = self.registry.subject_status(&subject.key()?);
                self.send_to(conn, frames::SUBJECT_STATUS, &status);
            }
            ClientMessage::Ping => {
                self.send_to(conn, frames::PONG, &json!({ "timestamp": now_timestamp() }));
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Intervention
    // ─────────────────────────────────────────────────────────────────────

    /// Pass a tool execution through the intervention gate.
    ///
    /// Executions of paused pairs publish an `interventionRequest` event
    /// (scoped to the pair's tool-execution subject), wait for a decision,
    /// and publish an `interventionResolved` event with the outcome.
    pub async fn checkpoint(&self, request: ExecutionRequest) -> GateDecision {
        let Some(ticket) = self.gate.register(&request) else {
            return GateDecision::Proceed {
                params: request.params,
                overridden: false,
            };
        };
        let subject = SubjectKey::tool_execution(&request.agent_id, &request.tool_id);

        self.publish(
            TelemetryEvent::new(
                EventKind::InterventionRequest,
                json!({
                    "executionId": request.execution_id,
                    "agentId": request.agent_id,
                    "toolId": request.tool_id,
                    "params": request.params,
                }),
            )
            .with_subject(subject.clone()),
        );

        let decision = ticket.wait().await;

        self.publish(
            TelemetryEvent::new(
                EventKind::InterventionResolved,
                json!({
                    "executionId": request.execution_id,
                    "agentId": request.agent_id,
                    "toolId": request.tool_id,
                    "decision": serde_json::to_value(&decision).unwrap_or(Value::Null),
                }),
            )
            .with_subject(subject),
        );
        decision
    }
}

impl EventSink for Gateway {
    fn emit(&self, event: TelemetryEvent) {
        self.publish(event);
    }
}
