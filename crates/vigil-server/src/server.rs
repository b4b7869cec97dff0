//! [`VigilServer`]: Axum HTTP + WebSocket front of the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vigil_core::{ConnectionId, DurableStore, SubjectKey, SubjectKeyError};
use vigil_settings::{PersistenceSettings, VigilSettings};
use vigil_store::SqliteStore;
use vigil_stream::{Gateway, PersistenceQueue, StreamMetrics, Transport, spawn_flush_scheduler};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::ConnectionHub;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The streaming gateway.
    pub gateway: Arc<Gateway>,
    /// Live WebSocket connections.
    pub hub: Arc<ConnectionHub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder was installed.
    pub metrics_handle: Option<PrometheusHandle>,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
}

/// The vigil server: gateway, connection hub and background tasks.
pub struct VigilServer {
    settings: VigilSettings,
    state: AppState,
    background: Vec<JoinHandle<()>>,
}

impl VigilServer {
    /// Assemble the server. With a `store`, every published event is also
    /// queued for durable storage.
    ///
    /// Must be called inside a Tokio runtime: the persistence writer is
    /// spawned here.
    pub fn new(
        settings: VigilSettings,
        store: Option<Arc<dyn DurableStore>>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let hub = Arc::new(ConnectionHub::new(settings.server.max_dropped_per_connection));
        let stream_metrics = Arc::new(StreamMetrics::new());
        let transport: Arc<dyn Transport> = Arc::clone(&hub) as Arc<dyn Transport>;

        let mut gateway = Gateway::new(&settings, transport, Arc::clone(&stream_metrics));
        let mut background = Vec::new();
        if let Some(store) = store {
            let (queue, writer) = PersistenceQueue::spawn(
                store,
                settings.persistence.queue_capacity,
                stream_metrics,
                shutdown.token(),
            );
            gateway = gateway.with_persistence(queue);
            background.push(writer);
        }

        let state = AppState {
            gateway: Arc::new(gateway),
            hub,
            shutdown,
            start_time: Instant::now(),
            metrics_handle,
            send_queue_capacity: settings.server.send_queue_capacity.max(1),
        };
        Self {
            settings,
            state,
            background,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// The gateway producers publish into.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Bind the configured address, start the flush scheduler and serve.
    pub async fn listen(self) -> Result<RunningServer, ServerError> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let router = self.router();
        let Self {
            state, mut background, ..
        } = self;

        background.push(spawn_flush_scheduler(
            Arc::clone(&state.gateway),
            state.shutdown.token(),
        ));

        let token = state.shutdown.token();
        background.push(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(%error, "http server stopped with error");
            }
        }));

        info!(%local_addr, "vigil gateway listening");
        Ok(RunningServer {
            local_addr,
            gateway: state.gateway,
            shutdown: state.shutdown,
            background,
        })
    }
}

/// A server accepting connections.
pub struct RunningServer {
    local_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown: Arc<ShutdownCoordinator>,
    background: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The gateway producers publish into.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Stop accepting connections, close sessions, flush buffered batches
    /// and drain the persistence queue.
    pub async fn stop(self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(self.background, timeout).await;
        info!("vigil gateway stopped");
    }
}

/// Open the telemetry store when persistence is enabled.
pub fn open_store(settings: &PersistenceSettings) -> Result<Option<Arc<dyn DurableStore>>, ServerError> {
    if !settings.enabled {
        return Ok(None);
    }
    let store = SqliteStore::open(&settings.db_path)?;
    Ok(Some(Arc::new(store)))
}

/// Parse the `subjects` query parameter: comma-separated subject keys.
pub fn parse_subjects(raw: Option<&str>) -> Result<Vec<SubjectKey>, SubjectKeyError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// Query string of `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Subjects whose status is sent in the handshake.
    #[serde(default)]
    pub subjects: Option<String>,
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let subjects = match parse_subjects(params.subjects.as_deref()) {
        Ok(subjects) => subjects,
        Err(error) => return (StatusCode::BAD_REQUEST, error.to_string()).into_response(),
    };
    let conn_id = ConnectionId::new();
    ws.on_upgrade(move |socket| run_ws_session(socket, conn_id, subjects, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.gateway.status();
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.hub.connection_count(),
        status.pending_interventions,
        status.metrics.events_published,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use vigil_core::TelemetryEvent;

    fn make_server() -> VigilServer {
        VigilServer::new(VigilSettings::default(), None, None)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_endpoint_reports_gateway_counters() {
        let server = make_server();
        server
            .gateway()
            .publish(TelemetryEvent::performance_metric(json!({"cpu": 3})));

        let (status, body) = get_json(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["pending_interventions"], 0);
        assert_eq!(body["events_published"], 1);
    }

    #[tokio::test]
    async fn health_reports_draining_after_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = get_json(server.router(), "/health").await;
        assert_eq!(body["status"], "draining");
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = VigilServer::new(VigilSettings::default(), None, Some(handle));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn subjects_query_parsing() {
        assert!(parse_subjects(None).unwrap().is_empty());
        assert!(parse_subjects(Some(" , ")).unwrap().is_empty());

        let subjects =
            parse_subjects(Some("agentThoughts:a1, toolExecution:a1:search")).unwrap();
        assert_eq!(
            subjects,
            vec![
                SubjectKey::agent_thoughts("a1"),
                SubjectKey::tool_execution("a1", "search"),
            ]
        );
        assert_matches!(parse_subjects(Some("nonsense")), Err(_));
    }

    #[tokio::test]
    async fn disabled_persistence_opens_nothing() {
        let settings = PersistenceSettings {
            enabled: false,
            ..PersistenceSettings::default()
        };
        assert!(open_store(&settings).unwrap().is_none());
    }

    #[tokio::test]
    async fn persistence_writes_published_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        let settings = PersistenceSettings {
            enabled: true,
            db_path: path.to_string_lossy().into_owned(),
            ..PersistenceSettings::default()
        };
        let store = open_store(&settings).unwrap();
        assert!(store.is_some());

        let mut vigil = VigilSettings::default();
        vigil.server.host = "127.0.0.1".into();
        vigil.server.port = 0;
        vigil.persistence = settings;
        let server = VigilServer::new(vigil, store, None);
        server
            .gateway()
            .publish(TelemetryEvent::agent_thought("a1", json!({"step": 1})));

        let running = server.listen().await.unwrap();
        running.stop(Some(Duration::from_secs(5))).await;

        let reopened = SqliteStore::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
