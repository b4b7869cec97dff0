//! Wire protocol between observers and the gateway.
//!
//! Every frame in either direction is a JSON object `{"type": ..., "data": ...}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_core::{ExecutionId, SubjectKey, SubjectKind, SubjectKeyError, TelemetryEvent};

use crate::errors::CodecError;
use crate::metrics::MetricsSnapshot;

pub use crate::history::HistoryFilter;

/// Outbound frame types.
pub mod frames {
    /// Aggregate gateway status, sent on connect.
    pub const SYSTEM_STATUS: &str = "system:status";
    /// Tail of every channel buffer, sent on connect.
    pub const INITIAL_BUFFER_DATA: &str = "initial:buffer:data";
    /// Reply to `request:history`.
    pub const HISTORY_RESPONSE: &str = "history:response";
    /// Reply to `request:subjectStatus`, also sent on connect.
    pub const SUBJECT_STATUS: &str = "subject:status";
    /// A request could not be honored.
    pub const ERROR: &str = "error";
    /// Reply to `ping`.
    pub const PONG: &str = "pong";
    /// Prefix of batch frames; the channel name follows.
    pub const BATCH_PREFIX: &str = "stream:batch:";
}

/// Frame type of a batch flushed from `channel`.
pub fn batch_frame_type(channel: &str) -> String {
    format!("{}{channel}", frames::BATCH_PREFIX)
}

#[derive(Serialize)]
struct Frame<'a, T: ?Sized> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a T,
}

/// Encode an outbound frame once, to be shared by every recipient.
pub fn encode_frame<T: Serialize + ?Sized>(kind: &str, data: &T) -> Result<Arc<str>, CodecError> {
    let text = serde_json::to_string(&Frame { kind, data })?;
    Ok(Arc::from(text))
}

/// A subject named by kind and id, as clients send it.
///
/// For `toolExecution` the id is `<agentId>:<toolId>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    /// Subject family.
    pub kind: SubjectKind,
    /// Id within the family.
    pub id: String,
}

impl SubjectRef {
    /// Resolve to a subject key.
    pub fn key(&self) -> Result<SubjectKey, SubjectKeyError> {
        SubjectKey::from_parts(self.kind, &self.id)
    }
}

/// An (agent, tool) pair addressed by intervention controls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRef {
    /// Agent running the tool.
    pub agent_id: String,
    /// Tool id.
    pub tool_id: String,
}

/// `intervention:approve` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    /// Waiting execution.
    pub execution_id: ExecutionId,
    /// Replacement parameters; absent means proceed unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `intervention:reject` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    /// Waiting execution.
    pub execution_id: ExecutionId,
    /// Reason reported to the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Messages observers send to the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Join a channel's batch stream.
    #[serde(rename = "subscribe:channel")]
    SubscribeChannel {
        /// Channel name.
        name: String,
    },
    /// Leave a channel's batch stream.
    #[serde(rename = "unsubscribe:channel")]
    UnsubscribeChannel {
        /// Channel name.
        name: String,
    },
    /// Join a subject room.
    #[serde(rename = "subscribe:subject")]
    SubscribeSubject(SubjectRef),
    /// Leave a subject room.
    #[serde(rename = "unsubscribe:subject")]
    UnsubscribeSubject(SubjectRef),
    /// Release a paused execution, optionally overriding its parameters.
    #[serde(rename = "intervention:approve")]
    Approve(ApproveRequest),
    /// Refuse a paused execution.
    #[serde(rename = "intervention:reject")]
    Reject(RejectRequest),
    /// Pause future executions of a tool by an agent.
    #[serde(rename = "intervention:pause")]
    Pause(ToolRef),
    /// Stop pausing and release executions already waiting.
    #[serde(rename = "intervention:resume")]
    Resume(ToolRef),
    /// Query the in-memory history log.
    #[serde(rename = "request:history")]
    History(HistoryFilter),
    /// Query a subject's tracking state.
    #[serde(rename = "request:subjectStatus")]
    SubjectStatus(SubjectRef),
    /// Liveness probe.
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// `system:status` payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// When the status was taken.
    pub timestamp: String,
    /// Connected observers.
    pub active_connections: usize,
    /// Configured channels.
    pub available_channels: Vec<String>,
    /// Gateway counters.
    pub metrics: MetricsSnapshot,
    /// Executions waiting on the intervention gate.
    pub pending_interventions: usize,
}

/// `history:response` payload.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryResponse {
    /// Matching events, oldest first.
    pub events: Vec<Arc<TelemetryEvent>>,
    /// Number of events returned.
    pub count: usize,
    /// The filter as received.
    pub filter: HistoryFilter,
}

/// `error` payload.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorFrame {
    /// What went wrong.
    pub message: String,
    /// The offending request, as far as it could be read.
    pub request: Value,
}
