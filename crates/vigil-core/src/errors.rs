//! Error types shared across crates.

use thiserror::Error;

/// Errors produced when parsing a subject key (`agentThoughts:<id>` etc.).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectKeyError {
    /// The key has no `kind:` prefix.
    #[error("subject key '{0}' has no kind separator")]
    MissingSeparator(String),
    /// The prefix does not name a known subject kind.
    #[error("unknown subject kind '{0}'")]
    UnknownKind(String),
    /// The id part is empty, or a tool execution key lacks its tool id.
    #[error("subject key '{0}' has an empty id")]
    EmptyId(String),
}

/// Errors reported by a [`DurableStore`](crate::store::DurableStore).
///
/// Persistence is best-effort: callers log these and move on.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the write.
    #[error("store backend error: {0}")]
    Backend(String),
    /// The record could not be serialized.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The store is shut down or otherwise not accepting writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
