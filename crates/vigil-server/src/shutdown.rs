//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Stopping the gateway cancels one shared token. From that point:
//!
//! 1. the HTTP server refuses new upgrades and every observer session
//!    deregisters and closes its socket;
//! 2. the flush scheduler leaves its tick loop and runs a final
//!    `flush_all`, so buffered items still reach subscribers that remain;
//! 3. the persistence writer closes its queue and writes every record
//!    already accepted.
//!
//! [`ShutdownCoordinator::graceful_shutdown`] waits for those tasks up to a
//! deadline and aborts whatever is still running.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long background tasks get to drain before shutdown gives up on them.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// One token shared by the HTTP server, every session, the flush scheduler
/// and the persistence writer.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for `handles` to finish
    /// their post-cancel work (final flush, persistence drain).
    ///
    /// Tasks still running at the deadline are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn multiple_tokens_all_cancelled() {
        let coord = ShutdownCoordinator::default();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_all_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        });

        coord.graceful_shutdown(vec![handle], None).await;
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn work_after_cancel_finishes_within_deadline() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let drained = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drained);
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(1)))
            .await;
        assert_eq!(drained.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_aborts_stragglers() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let abort = handle.abort_handle();

        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
        tokio::task::yield_now().await;
        assert!(abort.is_finished());
    }
}
