//! # vigil-server
//!
//! Axum HTTP + `WebSocket` front of the vigil streaming gateway.
//!
//! - **[`server`]**: [`server::VigilServer`] wires settings, store and gateway together
//! - **[`websocket`]**: per-connection send queues, the [`websocket::hub::ConnectionHub`]
//!   transport, and the session loop
//! - **[`health`]**, **[`metrics`]**: `/health` and Prometheus `/metrics`
//! - **[`shutdown`]**: one cancellation token for every background task
//!
//! ## Crate Position
//!
//! Top of the stack. Depends on vigil-core, vigil-settings, vigil-stream and vigil-store.

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::ServerError;
pub use server::{RunningServer, VigilServer};
