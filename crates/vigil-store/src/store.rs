//! [`SqliteStore`]: the durable store backed by one `telemetry` table.
//!
//! Appends run on the blocking pool so `SQLite` I/O never lands on a runtime
//! worker. A repeated event id is ignored rather than reported.

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tracing::{debug, info};
use vigil_core::{DurableStore, StoreError, TelemetryRecord};

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::{Result, SqliteStoreError};
use crate::migrations;

/// Telemetry rows in `SQLite`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &str) -> Result<Self> {
        let pool = connection::new_file(path, &ConnectionConfig::default())?;
        let store = Self::from_pool(pool)?;
        info!(path, "telemetry store opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let _ = migrations::run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Insert one record. Returns `false` if the event id was already stored.
    pub fn insert(&self, record: &TelemetryRecord) -> Result<bool> {
        let conn = self.pool.get()?;
        insert_record(&conn, record)
    }

    /// Rows stored.
    pub fn count(&self) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn append(&self, record: TelemetryRecord) -> std::result::Result<(), StoreError> {
        let pool = self.pool.clone();
        let inserted = tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = pool.get()?;
            insert_record(&conn, &record)
        })
        .await
        .map_err(|e| SqliteStoreError::Task(e.to_string()))??;
        if !inserted {
            debug!("duplicate telemetry record ignored");
        }
        Ok(())
    }
}

fn insert_record(conn: &Connection, record: &TelemetryRecord) -> Result<bool> {
    let payload = serde_json::to_string(&record.payload)?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO telemetry (event_id, kind, channel, subject, timestamp, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.event_id,
            record.kind.as_str(),
            record.channel,
            record.subject,
            record.timestamp,
            payload,
        ],
    )?;
    Ok(changed == 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::OptionalExtension;
    use serde_json::{Value, json};
    use vigil_core::TelemetryEvent;

    fn record(event: &TelemetryEvent) -> TelemetryRecord {
        TelemetryRecord::from(event)
    }

    fn read_back(store: &SqliteStore, event_id: &str) -> Option<TelemetryRecord> {
        let conn = store.pool.get().unwrap();
        conn.query_row(
            "SELECT event_id, kind, channel, subject, timestamp, payload FROM telemetry
             WHERE event_id = ?1",
            params![event_id],
            |row| {
                let kind: String = row.get(1)?;
                let payload: String = row.get(5)?;
                Ok(TelemetryRecord {
                    event_id: row.get(0)?,
                    kind: serde_json::from_value(Value::String(kind)).unwrap(),
                    channel: row.get(2)?,
                    subject: row.get(3)?,
                    timestamp: row.get(4)?,
                    payload: serde_json::from_str(&payload).unwrap(),
                })
            },
        )
        .optional()
        .unwrap()
    }

    #[test]
    fn insert_and_read_back() {
        let store = SqliteStore::in_memory().unwrap();
        let event = TelemetryEvent::tool_execution("a1", "search", json!({"phase": "start"}));
        assert!(store.insert(&record(&event)).unwrap());

        let stored = read_back(&store, event.id.as_str()).unwrap();
        assert_eq!(stored, record(&event));
        assert_eq!(stored.subject.as_deref(), Some("toolExecution:a1:search"));
        assert!(read_back(&store, "evt_missing").is_none());
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let rec = record(&TelemetryEvent::performance_metric(json!({"cpu": 1})));
        assert!(store.insert(&rec).unwrap());
        assert!(!store.insert(&rec).unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn append_through_trait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        let durable: &dyn DurableStore = &store;
        durable
            .append(record(&TelemetryEvent::agent_decision("a1", json!({"pick": 2}))))
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);

        // Reopening keeps the rows and does not re-run migrations.
        drop(store);
        let reopened = SqliteStore::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
