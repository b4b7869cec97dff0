//! # vigil-core
//!
//! Foundation types shared by every Vigil crate.
//!
//! - **Events**: [`events::TelemetryEvent`] and its [`events::EventKind`] taxonomy
//! - **Subjects**: [`subject::SubjectKey`] scoping an event to one agent, state engine, or tool
//! - **Branded IDs**: [`ids::ConnectionId`], [`ids::ExecutionId`], [`ids::EventId`]
//! - **Durable store**: the [`store::DurableStore`] collaborator trait and its record type
//! - **Errors**: [`errors::SubjectKeyError`], [`errors::StoreError`]
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other vigil crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod store;
pub mod subject;

pub use errors::{StoreError, SubjectKeyError};
pub use events::{EventKind, TelemetryEvent, channels};
pub use ids::{ConnectionId, EventId, ExecutionId};
pub use store::{DurableStore, TelemetryRecord};
pub use subject::{SubjectKey, SubjectKind};
