//! `Server`: axum HTTP + WebSocket server with an optional datagram listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use skein_core::WireMessage;
use skein_router::Router;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::callbacks::CallbackSlots;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId};
use crate::errors::{CloseReason, ConfigError, PushError, ServerError};
use crate::health::{self, HealthResponse};
use crate::registry::ConnectionRegistry;
use crate::session::{ServerContext, Session, Shared};
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use crate::udp::run_udp;
use crate::ws::ws_handler;

/// A configured server. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("connections", &self.count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`]. `on_open`, `on_close` and `on_error` are required.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router<ServerContext>,
    callbacks: CallbackSlots,
    metrics: Option<PrometheusHandle>,
}

impl ServerBuilder {
    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Router used for every connection.
    #[must_use]
    pub fn router(mut self, router: Router<ServerContext>) -> Self {
        self.router = router;
        self
    }

    /// Called once a connection is registered.
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(Session) + Send + Sync + 'static) -> Self {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Called once a connection is gone.
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(ConnectionId, CloseReason) + Send + Sync + 'static) -> Self {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Called for runtime errors with no caller to return to.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ServerError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// Called for transport messages that are not frames.
    #[must_use]
    pub fn on_message(mut self, f: impl Fn(&Session, &WireMessage) + Send + Sync + 'static) -> Self {
        self.callbacks.on_message = Some(Arc::new(f));
        self
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Server, ConfigError> {
        self.config.validate()?;
        let callbacks = self.callbacks.build()?;
        let registry = Arc::new(ConnectionRegistry::new(self.config.write_timeout));
        Ok(Server {
            shared: Arc::new(Shared {
                config: self.config,
                registry,
                router: Arc::new(self.router),
                callbacks,
            }),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: self.metrics,
        })
    }
}

impl Server {
    /// Start building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Build the axum router: the upgrade path, `/health` and, when a
    /// recorder handle was given, `/metrics`.
    pub fn app(&self) -> axum::Router {
        let mut app = axum::Router::new()
            .route(&self.shared.config.path, get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            app = app.route("/metrics", get(metrics_handler));
        }
        app.with_state(self.clone()).layer(TraceLayer::new_for_http())
    }

    /// Push an event to connection `id`.
    pub async fn push(&self, id: ConnectionId, event: &str, body: &[u8]) -> Result<(), PushError> {
        self.shared.registry.push_event(id, 0, event, body).await
    }

    /// Push `value` as JSON to connection `id`.
    pub async fn json_push<T: Serialize + ?Sized>(
        &self,
        id: ConnectionId,
        event: &str,
        value: &T,
    ) -> Result<(), PushError> {
        let body = serde_json::to_vec(value)?;
        self.push(id, event, &body).await
    }

    /// Push an event to every live connection; returns the delivered count.
    pub async fn emit_all(&self, event: &str, body: &[u8]) -> usize {
        self.shared.registry.emit_all(event, body).await
    }

    /// Broadcast `value` as JSON.
    pub async fn json_emit_all<T: Serialize + ?Sized>(
        &self,
        event: &str,
        value: &T,
    ) -> Result<usize, PushError> {
        let body = serde_json::to_vec(value)?;
        Ok(self.emit_all(event, &body).await)
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Snapshot of every live connection.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.all()
    }

    /// Bind the configured addresses and start serving.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let config = &self.shared.config;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let udp = match config.udp_port {
            Some(port) => Some(UdpSocket::bind((config.host.as_str(), port)).await?),
            None => None,
        };
        self.serve(listener, udp).await
    }

    /// Serve on already bound sockets.
    pub async fn serve(
        &self,
        listener: TcpListener,
        udp: Option<UdpSocket>,
    ) -> Result<ServerHandle, ServerError> {
        let local_addr = listener.local_addr()?;
        let mut tasks = Vec::new();

        let app = self.app();
        let token = self.shutdown.token();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "websocket listener failed");
            }
        }));

        let udp_addr = match udp {
            Some(socket) => {
                let addr = socket.local_addr()?;
                tasks.push(tokio::spawn(run_udp(
                    self.shared(),
                    Arc::new(socket),
                    self.shutdown.token(),
                )));
                Some(addr)
            }
            None => None,
        };

        info!(%local_addr, ?udp_addr, path = %self.shared.config.path, "skein server started");
        Ok(ServerHandle {
            local_addr,
            udp_addr,
            shutdown: Arc::clone(&self.shutdown),
            tasks,
            timeout: self.shared.config.shutdown_timeout,
        })
    }
}

/// Running server. Dropping it leaves the server running; call
/// [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    /// WebSocket listener address.
    pub local_addr: SocketAddr,
    /// Datagram listener address, if one is running.
    pub udp_addr: Option<SocketAddr>,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
    timeout: std::time::Duration,
}

impl ServerHandle {
    /// WebSocket port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, close every connection and wait up to
    /// `shutdown_timeout` for the listeners and session loops. On
    /// [`DrainOutcome::Complete`] every `on_close` has already run.
    pub async fn shutdown(self) -> DrainOutcome {
        self.shutdown.drain(self.tasks, self.timeout).await
    }
}

/// GET /health
async fn health_handler(State(server): State<Server>) -> Json<HealthResponse> {
    Json(health::health_check(server.start_time, server.count()))
}

/// GET /metrics
async fn metrics_handler(State(server): State<Server>) -> impl IntoResponse {
    match &server.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(handle)),
        None => (StatusCode::NOT_FOUND, String::new()),
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
    use tower::ServiceExt;

    fn builder() -> ServerBuilder {
        Server::builder()
            .on_open(|_| {})
            .on_close(|_, _| {})
            .on_error(|_| {})
    }

    #[test]
    fn build_requires_callbacks() {
        assert_matches!(
            Server::builder().build(),
            Err(ConfigError::MissingCallback("on_open"))
        );
        assert_matches!(
            Server::builder().on_open(|_| {}).on_close(|_, _| {}).build(),
            Err(ConfigError::MissingCallback("on_error"))
        );
        assert!(builder().build().is_ok());
    }

    #[test]
    fn build_validates_config() {
        let config = ServerConfig {
            path: "ws".into(),
            ..ServerConfig::default()
        };
        assert_matches!(builder().config(config).build(), Err(ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = builder().build().unwrap();
        let resp = server
            .app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_route_only_with_handle() {
        let server = builder().build().unwrap();
        let resp = server
            .app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = builder().metrics(handle).build().unwrap();
        let resp = server
            .app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn push_to_unknown_connection_fails() {
        let server = builder().build().unwrap();
        assert_matches!(server.push(3, "x", b"").await, Err(PushError::NotFound(3)));
        assert_eq!(server.emit_all("x", b"").await, 0);
        assert_eq!(server.json_emit_all("x", &[1, 2]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn start_and_shutdown() {
        let server = builder().build().unwrap();
        let handle = server.start().await.unwrap();
        assert_ne!(handle.port(), 0);
        assert!(handle.udp_addr.is_none());
        assert_eq!(handle.shutdown().await, DrainOutcome::Complete);
        assert!(server.shutdown_coordinator().is_draining());
    }
}
