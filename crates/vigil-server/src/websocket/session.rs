//! One observer's WebSocket session, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use vigil_core::{ConnectionId, SubjectKey};

use super::connection::ClientConnection;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL};
use crate::server::AppState;

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long queued frames may take to drain after the reader stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a session for a freshly upgraded socket.
///
/// Registers the connection with the hub and the gateway (which sends the
/// handshake frames), forwards queued frames to the socket, and hands every
/// inbound text frame to the gateway. Ends on client close, eviction, or
/// server shutdown.
#[instrument(skip_all, fields(conn = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    subjects: Vec<SubjectKey>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<str>>(state.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));
    let evicted = connection.evicted();
    let shutdown = state.shutdown.token();

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    state.hub.add(Arc::clone(&connection));
    if !state.gateway.connect(&conn_id, &subjects) {
        warn!("gateway refused connection");
        let _ = state.hub.remove(&conn_id);
        return;
    }

    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
            () = evicted.cancelled() => {
                info!(dropped = connection.drop_count(), "session evicted");
                break;
            }
            next = ws_rx.next() => next,
        };
        let Some(Ok(message)) = next else { break };

        match message {
            Message::Text(text) => state.gateway.handle_message(&conn_id, text.as_str()),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => state.gateway.handle_message(&conn_id, text),
                Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.gateway.disconnect(&conn_id);
    let _ = state.hub.remove(&conn_id);
    let lifetime = connection.age();
    drop(connection);

    // Dropping the last sender lets the forwarder drain what is queued and
    // send a Close frame. An evicted client is not waited on.
    let abort = outbound.abort_handle();
    if evicted.is_cancelled() || tokio::time::timeout(DRAIN_TIMEOUT, outbound).await.is_err() {
        abort.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(lifetime.as_secs_f64());
    info!(
        lifetime_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX),
        "observer session ended"
    );
}
