//! The durable-store collaborator.
//!
//! Writes are best-effort: the gateway never waits on them from the
//! delivery path, and a failed append is logged and forgotten.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;
use crate::events::{EventKind, TelemetryEvent};

/// One row handed to the durable store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Source event id.
    pub event_id: String,
    /// Event kind.
    pub kind: EventKind,
    /// Channel the event was routed to.
    pub channel: String,
    /// Subject key in wire form, if scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Event timestamp.
    pub timestamp: String,
    /// Event payload.
    pub payload: Value,
}

impl From<&TelemetryEvent> for TelemetryRecord {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            event_id: event.id.to_string(),
            kind: event.kind,
            channel: event.channel().to_owned(),
            subject: event.subject.as_ref().map(ToString::to_string),
            timestamp: event.timestamp.clone(),
            payload: event.data.clone(),
        }
    }
}

/// Append-only telemetry sink.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Append one record. `record.kind` is the event kind column.
    async fn append(&self, record: TelemetryRecord) -> Result<(), StoreError>;
}
