//! # vigil-stream
//!
//! The streaming engine behind the vigil gateway.
//!
//! - **Codec**: [`codec::Codec`] encodes events and compresses large items while they wait
//! - **Channel buffers**: [`buffer::ChannelBuffers`], one FIFO per configured channel
//! - **Subscriptions**: [`registry::SubscriptionRegistry`] for channel and subject-room membership
//! - **Interception**: [`interceptor::Interceptor`] wraps producers so their calls emit events
//! - **Dispatch**: [`gateway::Gateway`] routes events and serves the client protocol
//! - **Intervention**: [`gate::InterventionGate`] holds tool executions for operator approval
//! - **Scheduling**: [`scheduler::spawn_flush_scheduler`] sweeps stale buffers
//! - **Persistence**: [`persistence::PersistenceQueue`] forwards events to the durable store
//!
//! ## Crate Position
//!
//! Depends on vigil-core and vigil-settings. The transport is abstracted by
//! [`transport::Transport`]; vigil-server provides the WebSocket one.

#![deny(unsafe_code)]

pub mod buffer;
pub mod codec;
pub mod errors;
pub mod gate;
pub mod gateway;
pub mod history;
pub mod interceptor;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use buffer::{Batch, ChannelBuffers, EnqueueOutcome};
pub use codec::Codec;
pub use errors::{CodecError, GateError, ProtocolError};
pub use gate::{ExecutionRequest, GateDecision, InterventionGate, PendingTicket};
pub use gateway::Gateway;
pub use history::{HistoryFilter, HistoryLog};
pub use interceptor::{EventSink, Interceptor, StateObserver, Traced};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use persistence::PersistenceQueue;
pub use registry::{ConnectionInfo, SubjectStatus, SubscriptionRegistry};
pub use scheduler::spawn_flush_scheduler;
pub use transport::{Delivery, DeliveryReport, Transport};
