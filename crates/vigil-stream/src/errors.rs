//! Error types for the stream engine.

use thiserror::Error;
use vigil_core::{ExecutionId, SubjectKeyError};

/// Encoding and buffer-compression failures.
///
/// None of these abort delivery: callers log them and fall back to the raw
/// encoded form.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
    /// zstd compression failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
    /// zstd decompression failed.
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
    /// Restored bytes are not the JSON document that was stored.
    #[error("restored item is corrupt: {0}")]
    Corrupt(String),
}

/// Intervention gate failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No execution with this id is waiting for a decision.
    #[error("no pending approval for execution {0}")]
    UnknownExecution(ExecutionId),
}

/// A client request that could not be honored.
///
/// Reported to the offending connection as an `error` frame; the connection
/// stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a recognized client message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The subject reference does not name a valid subject key.
    #[error(transparent)]
    InvalidSubject(#[from] SubjectKeyError),
    /// The intervention request referenced no pending execution.
    #[error(transparent)]
    Gate(#[from] GateError),
}
