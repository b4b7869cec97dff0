//! Telemetry events flowing from producers to observers.
//!
//! A [`TelemetryEvent`] carries an opaque JSON `data` payload plus routing
//! metadata: its [`EventKind`] (which picks a default channel and the
//! outbound event name), an optional explicit channel override, and an
//! optional [`SubjectKey`] for immediate delivery to a focused observer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EventId;
use crate::subject::SubjectKey;

/// Names of the default channel set.
pub mod channels {
    /// Agent reasoning steps.
    pub const THOUGHTS: &str = "thoughts";
    /// Agent decisions and intercepted agent calls.
    pub const DECISIONS: &str = "decisions";
    /// State-engine transitions and collapses.
    pub const QUANTUM: &str = "quantum";
    /// Tool invocation lifecycle.
    pub const TOOLS: &str = "tools";
    /// Human-intervention requests and resolutions.
    pub const INTERVENTIONS: &str = "interventions";
    /// Performance metrics.
    pub const PERFORMANCE: &str = "performance";

    /// Channels configured when none are given.
    pub const DEFAULT: [&str; 6] = [THOUGHTS, DECISIONS, QUANTUM, TOOLS, INTERVENTIONS, PERFORMANCE];
}

/// Event taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// One reasoning step of an agent.
    AgentThought,
    /// A decision taken by an agent.
    AgentDecision,
    /// A state-engine snapshot after a transition.
    StateTransition,
    /// A multi-valued state resolved to exactly one value.
    StateCollapse,
    /// Tool invocation lifecycle (start, finish, failure).
    ToolExecution,
    /// An execution is waiting for human approval.
    InterventionRequest,
    /// A waiting execution was approved, overridden, or rejected.
    InterventionResolved,
    /// A performance metric sample.
    PerformanceMetric,
    /// A call observed by the interceptor.
    MethodCall,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 9] = [
        Self::AgentThought,
        Self::AgentDecision,
        Self::StateTransition,
        Self::StateCollapse,
        Self::ToolExecution,
        Self::InterventionRequest,
        Self::InterventionResolved,
        Self::PerformanceMetric,
        Self::MethodCall,
    ];

    /// Stable identifier used by the durable store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentThought => "agentThought",
            Self::AgentDecision => "agentDecision",
            Self::StateTransition => "stateTransition",
            Self::StateCollapse => "stateCollapse",
            Self::ToolExecution => "toolExecution",
            Self::InterventionRequest => "interventionRequest",
            Self::InterventionResolved => "interventionResolved",
            Self::PerformanceMetric => "performanceMetric",
            Self::MethodCall => "methodCall",
        }
    }

    /// Channel an event of this kind is buffered on unless overridden.
    pub fn default_channel(self) -> &'static str {
        match self {
            Self::AgentThought => channels::THOUGHTS,
            Self::AgentDecision | Self::MethodCall => channels::DECISIONS,
            Self::StateTransition | Self::StateCollapse => channels::QUANTUM,
            Self::ToolExecution => channels::TOOLS,
            Self::InterventionRequest | Self::InterventionResolved => channels::INTERVENTIONS,
            Self::PerformanceMetric => channels::PERFORMANCE,
        }
    }

    /// Outbound event name used for immediate subject-room delivery.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::AgentThought => "agent:thought",
            Self::AgentDecision => "agent:decision",
            Self::StateTransition => "quantum:state:changed",
            Self::StateCollapse => "quantum:state:collapsed",
            Self::ToolExecution => "tool:execution",
            Self::InterventionRequest => "intervention:requested",
            Self::InterventionResolved => "intervention:resolved",
            Self::PerformanceMetric => "performance:metric",
            Self::MethodCall => "method:call",
        }
    }
}

/// A structured telemetry event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Unique event id.
    pub id: EventId,
    /// Event kind.
    pub kind: EventKind,
    /// Explicit channel; `None` means the kind's default channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Subject room this event is also delivered to immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectKey>,
    /// RFC 3339 timestamp with millisecond precision (UTC).
    pub timestamp: String,
    /// Opaque event payload.
    pub data: Value,
}

impl TelemetryEvent {
    /// Create an event stamped with the current time.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            id: EventId::new(),
            kind,
            channel: None,
            subject: None,
            timestamp: now_timestamp(),
            data,
        }
    }

    /// Scope the event to a subject room.
    #[must_use]
    pub fn with_subject(mut self, subject: SubjectKey) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Route the event to an explicit channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// The channel this event is buffered on.
    pub fn channel(&self) -> &str {
        self.channel
            .as_deref()
            .unwrap_or_else(|| self.kind.default_channel())
    }

    /// Outbound event name for immediate delivery.
    pub fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }

    /// A reasoning step scoped to `agentThoughts:<agent_id>`.
    pub fn agent_thought(agent_id: &str, thought: Value) -> Self {
        Self::new(EventKind::AgentThought, thought)
            .with_subject(SubjectKey::agent_thoughts(agent_id))
    }

    /// A decision scoped to `agentThoughts:<agent_id>`.
    pub fn agent_decision(agent_id: &str, decision: Value) -> Self {
        Self::new(EventKind::AgentDecision, decision)
            .with_subject(SubjectKey::agent_thoughts(agent_id))
    }

    /// A state snapshot scoped to `quantumState:<system_id>`.
    pub fn state_transition(system_id: &str, snapshot: Value) -> Self {
        Self::new(EventKind::StateTransition, snapshot)
            .with_subject(SubjectKey::quantum_state(system_id))
    }

    /// A tool lifecycle event scoped to `toolExecution:<agent_id>:<tool_id>`.
    pub fn tool_execution(agent_id: &str, tool_id: &str, detail: Value) -> Self {
        Self::new(EventKind::ToolExecution, detail)
            .with_subject(SubjectKey::tool_execution(agent_id, tool_id))
    }

    /// An unscoped performance sample.
    pub fn performance_metric(detail: Value) -> Self {
        Self::new(EventKind::PerformanceMetric, detail)
    }
}

/// Current UTC time as RFC 3339 with milliseconds.
///
/// The fixed width makes timestamps comparable as strings.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
