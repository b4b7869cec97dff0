//! Server error types.

use thiserror::Error;

/// Failures while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The telemetry store could not be opened.
    #[error("telemetry store unavailable: {0}")]
    Store(#[from] vigil_store::SqliteStoreError),

    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}
