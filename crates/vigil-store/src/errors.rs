//! Error types for the SQLite store.

use thiserror::Error;
use vigil_core::StoreError;

/// Errors raised by [`crate::SqliteStore`] operations.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Payload (de)serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// The blocking writer task panicked or was cancelled.
    #[error("writer task failed: {0}")]
    Task(String),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, SqliteStoreError>;

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Serde(e) => StoreError::Serialization(e),
            SqliteStoreError::Pool(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn sqlite_error_display() {
        let err = SqliteStoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn converts_to_store_error() {
        let serde_err = serde_json::from_str::<String>("nope").unwrap_err();
        assert_matches!(
            StoreError::from(SqliteStoreError::Serde(serde_err)),
            StoreError::Serialization(_)
        );
        assert_matches!(
            StoreError::from(SqliteStoreError::Migration { message: "v1".into() }),
            StoreError::Backend(msg) if msg.contains("v1")
        );
    }
}
