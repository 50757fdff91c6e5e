//! `RunboxServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use runbox_core::ConnectionId;
use runbox_pipeline::RunService;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_REJECTED_TOTAL, render};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::keepalive::KeepaliveScheduler;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionDeps, run_ws_session};

/// Poll interval while waiting for sessions to drain on shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaborators handed to each session.
    pub deps: SessionDeps,
    /// One permit per allowed concurrent connection.
    pub slots: Arc<Semaphore>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Max inbound message size in bytes.
    pub max_message_size: usize,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The runbox server.
pub struct RunboxServer {
    config: ServerConfig,
    runner: RunService,
    registry: Arc<ConnectionRegistry>,
    slots: Arc<Semaphore>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RunboxServer {
    /// Create a new server around a shared [`RunService`].
    pub fn new(config: ServerConfig, runner: RunService) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            runner,
            registry: Arc::new(ConnectionRegistry::new()),
            slots,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            deps: SessionDeps {
                registry: self.registry.clone(),
                runner: self.runner.clone(),
                limits: self.config.session_limits(),
                shutdown: self.shutdown.token(),
            },
            slots: self.slots.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving.
    ///
    /// Spawns the HTTP server (stopping when the shutdown token fires) and
    /// the keepalive scheduler. Returns the bound address and the server
    /// task handle.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let keepalive = KeepaliveScheduler::new(
            self.registry.clone(),
            self.config.keepalive_initial_delay(),
            self.config.keepalive_interval(),
        );
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            let _ = keepalive.run(token).await;
        }));

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server terminated with error");
            }
        });

        info!(%local_addr, max_connections = self.config.max_connections, "runbox server listening");
        Ok((local_addr, handle))
    }

    /// Stop accepting work and wait for background tasks and open sessions.
    ///
    /// Open sessions are closed with status 1001. Returns `true` if
    /// everything drained within the configured shutdown timeout.
    pub async fn shutdown_gracefully(&self) -> bool {
        let timeout = self.config.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let tasks_drained = self.shutdown.graceful_shutdown(timeout).await;

        while !self.registry.is_empty().await {
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.registry.len().await;
                warn!(
                    remaining,
                    "sessions still open after shutdown timeout"
                );
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        info!("shutdown complete");
        tasks_drained
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for RunboxServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunboxServer")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
        warn!("connection limit reached, rejecting upgrade");
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let conn_id = ConnectionId::new();
    let deps = state.deps;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, conn_id, deps).await;
            drop(permit);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.deps.registry.len().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(&handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use runbox_core::ToolchainId;
    use runbox_pipeline::{BuildOutcome, BuildPipeline, LineDiagnosticParser};
    use tower::ServiceExt;

    struct NoopPipeline;

    #[async_trait]
    impl BuildPipeline for NoopPipeline {
        async fn build_and_run(&self, _source: &str, _toolchain: &ToolchainId) -> BuildOutcome {
            BuildOutcome::Success(String::new())
        }
    }

    fn make_server() -> RunboxServer {
        let runner = RunService::new(Arc::new(NoopPipeline), Arc::new(LineDiagnosticParser::new()));
        RunboxServer::new(ServerConfig::default(), runner)
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let resp = get(server.router(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let parsed = body_json(get(server.router(), "/health").await).await;
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server();
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders_text() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let resp = get(server.router(), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let resp = get(server.router(), "/ws").await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = get(server.router(), "/nonexistent").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.shutdown_gracefully().await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn listen_on_taken_port_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let runner = RunService::new(Arc::new(NoopPipeline), Arc::new(LineDiagnosticParser::new()));
        let config = ServerConfig {
            port,
            ..ServerConfig::default()
        };
        let server = RunboxServer::new(config, runner);
        let err = server.listen().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
