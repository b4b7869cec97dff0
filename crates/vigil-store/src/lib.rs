//! # vigil-store
//!
//! `SQLite` implementation of the [`vigil_core::DurableStore`] collaborator.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode applied to every connection
//! - **[`migrations`]**: version-tracked schema, embedded at compile time
//! - **[`store`]**: [`SqliteStore`], appending telemetry rows off the async runtime
//!
//! ## Crate Position
//!
//! Depends on vigil-core. Used by vigil-server when persistence is enabled.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod store;

pub use errors::{Result, SqliteStoreError};
pub use store::SqliteStore;
