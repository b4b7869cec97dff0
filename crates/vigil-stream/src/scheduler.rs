//! Periodic sweep of stale channel buffers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gateway::Gateway;

/// Flush stale buffers every flush interval until `cancel` fires, then flush
/// whatever is left.
pub fn spawn_flush_scheduler(gateway: Arc<Gateway>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = gateway.flush_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        let _ = ticker.tick().await;
        info!(interval_ms = period.as_millis() as u64, "flush scheduler started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = gateway.flush_stale(Instant::now());
                    if flushed > 0 {
                        debug!(flushed, "stale buffers flushed");
                    }
                }
            }
        }

        let remaining = gateway.flush_all();
        info!(remaining, "flush scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StreamMetrics;
    use crate::testutil::RecordingTransport;
    use crate::transport::Transport;
    use serde_json::json;
    use std::time::Duration;
    use vigil_core::{ConnectionId, TelemetryEvent, channels};
    use vigil_settings::VigilSettings;

    fn setup(buffer_size: usize) -> (Arc<Gateway>, Arc<RecordingTransport>, ConnectionId) {
        let mut settings = VigilSettings::default();
        settings.stream.buffer_size = buffer_size;
        settings.stream.flush_interval_ms = 100;
        let transport = RecordingTransport::new();
        let gateway = Arc::new(Gateway::new(
            &settings,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(StreamMetrics::new()),
        ));
        let conn = ConnectionId::from("observer");
        assert!(gateway.connect(&conn, &[]));
        gateway.handle_message(
            &conn,
            &json!({"type": "subscribe:channel", "data": {"name": "thoughts"}}).to_string(),
        );
        (gateway, transport, conn)
    }

    fn batch_sizes(transport: &RecordingTransport, conn: &ConnectionId) -> Vec<u64> {
        transport
            .frames_of(conn, "stream:batch:thoughts")
            .iter()
            .map(|frame| frame["data"]["count"].as_u64().unwrap())
            .collect()
    }

    fn publish(gateway: &Gateway, n: u64) {
        gateway.publish(TelemetryEvent::agent_thought("a1", json!({ "n": n })));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_and_size_flushes() {
        let (gateway, transport, conn) = setup(3);
        let cancel = CancellationToken::new();
        let handle = spawn_flush_scheduler(Arc::clone(&gateway), cancel.clone());
        tokio::task::yield_now().await;

        publish(&gateway, 0);
        publish(&gateway, 1);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(batch_sizes(&transport, &conn), vec![2]);

        for n in 2..5 {
            publish(&gateway, n);
        }
        // Flushed by size, before any further tick.
        assert_eq!(batch_sizes(&transport, &conn), vec![2, 3]);
        assert_eq!(gateway.pending(channels::THOUGHTS), Some(0));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_items_wait_for_the_interval() {
        let (gateway, transport, conn) = setup(50);
        let cancel = CancellationToken::new();
        let handle = spawn_flush_scheduler(Arc::clone(&gateway), cancel.clone());
        tokio::task::yield_now().await;

        // The buffer was created at startup, so the first item after an
        // idle stretch goes out on the next tick.
        tokio::time::sleep(Duration::from_millis(250)).await;
        publish(&gateway, 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(batch_sizes(&transport, &conn), vec![1]);

        // The channel is not stale again until an interval after that flush.
        publish(&gateway, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(batch_sizes(&transport, &conn), vec![1]);
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert_eq!(batch_sizes(&transport, &conn), vec![1, 1]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_remaining_items() {
        let (gateway, transport, conn) = setup(50);
        let cancel = CancellationToken::new();
        let handle = spawn_flush_scheduler(Arc::clone(&gateway), cancel.clone());
        tokio::task::yield_now().await;

        publish(&gateway, 0);
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(batch_sizes(&transport, &conn), vec![1]);
    }
}
