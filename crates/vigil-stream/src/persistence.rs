//! Fire-and-forget forwarding of events to the durable store.
//!
//! Records go through a bounded queue drained by one background task, so a
//! slow or failing store can never stall publishing. A full queue drops the
//! record and counts it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{DurableStore, TelemetryRecord};

use crate::metrics::StreamMetrics;

/// Producer side of the persistence queue.
pub struct PersistenceQueue {
    tx: mpsc::Sender<TelemetryRecord>,
    metrics: Arc<StreamMetrics>,
}

impl PersistenceQueue {
    /// Start the writer task.
    ///
    /// When `cancel` fires the writer stops accepting records, writes what is
    /// already queued, and exits.
    pub fn spawn(
        store: Arc<dyn DurableStore>,
        capacity: usize,
        metrics: Arc<StreamMetrics>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(store, rx, cancel));
        (Self { tx, metrics }, handle)
    }

    /// Queue a record without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, record: TelemetryRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                self.metrics.record_dropped(1);
                warn!(event_id = %record.event_id, "persistence queue full, dropping record");
                false
            }
            Err(TrySendError::Closed(record)) => {
                debug!(event_id = %record.event_id, "persistence writer stopped, dropping record");
                false
            }
        }
    }
}

async fn run_writer(
    store: Arc<dyn DurableStore>,
    mut rx: mpsc::Receiver<TelemetryRecord>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => write(store.as_ref(), record).await,
                None => return,
            },
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(record) = rx.recv().await {
        write(store.as_ref(), record).await;
        drained += 1;
    }
    info!(drained, "persistence queue drained");
}

async fn write(store: &dyn DurableStore, record: TelemetryRecord) {
    let event_id = record.event_id.clone();
    let kind = record.kind.as_str();
    if let Err(error) = store.append(record).await {
        metrics::counter!("vigil_persistence_errors_total").increment(1);
        warn!(%error, %event_id, kind, "durable store append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::time::Duration;
    use vigil_core::{StoreError, TelemetryEvent};

    mock! {
        pub Store {}

        #[async_trait]
        impl DurableStore for Store {
            async fn append(&self, record: TelemetryRecord) -> Result<(), StoreError>;
        }
    }

    fn record(n: u64) -> TelemetryRecord {
        TelemetryRecord::from(&TelemetryEvent::performance_metric(json!({ "n": n })))
    }

    #[tokio::test]
    async fn records_reach_the_store() {
        let mut store = MockStore::new();
        let _ = store.expect_append().times(3).returning(|_| Ok(()));
        let cancel = CancellationToken::new();
        let (queue, handle) =
            PersistenceQueue::spawn(Arc::new(store), 8, Arc::new(StreamMetrics::new()), cancel.clone());

        for n in 0..3 {
            assert!(queue.submit(record(n)));
        }
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let mut store = MockStore::new();
        let _ = store
            .expect_append()
            .times(2)
            .returning(|_| Err(StoreError::Backend("disk full".into())));
        let cancel = CancellationToken::new();
        let (queue, handle) =
            PersistenceQueue::spawn(Arc::new(store), 8, Arc::new(StreamMetrics::new()), cancel.clone());

        assert!(queue.submit(record(0)));
        assert!(queue.submit(record(1)));
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn overflow_is_counted() {
        struct Stalled;

        #[async_trait]
        impl DurableStore for Stalled {
            async fn append(&self, _record: TelemetryRecord) -> Result<(), StoreError> {
                std::future::pending().await
            }
        }

        let metrics = Arc::new(StreamMetrics::new());
        let cancel = CancellationToken::new();
        let (queue, handle) =
            PersistenceQueue::spawn(Arc::new(Stalled), 2, Arc::clone(&metrics), cancel.clone());

        // Let the writer pick up the first record and stall on it.
        assert!(queue.submit(record(0)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(queue.submit(record(1)));
        assert!(queue.submit(record(2)));
        assert!(!queue.submit(record(3)));
        assert_eq!(metrics.snapshot().dropped_messages, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped_quietly() {
        let mut store = MockStore::new();
        let _ = store.expect_append().times(0);
        let metrics = Arc::new(StreamMetrics::new());
        let cancel = CancellationToken::new();
        let (queue, handle) =
            PersistenceQueue::spawn(Arc::new(store), 4, Arc::clone(&metrics), cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
        assert!(!queue.submit(record(0)));
        assert_eq!(metrics.snapshot().dropped_messages, 0);
    }
}
