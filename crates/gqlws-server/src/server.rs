//! `GqlWsServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use gqlws_core::{ConnectionId, SUBPROTOCOL};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::graphql::{AsyncGraphqlParser, Executor, QueryParser};
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::subscriptions::{ConnectionRegistry, DispatcherConfig, EventDispatcher, EventPublisher};
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections and subscriptions.
    pub registry: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Settings applied to every new session.
    pub session: SessionConfig,
    /// One permit per connection slot; a session holds its permit until it ends.
    pub slots: Arc<Semaphore>,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Reserve a connection slot, `None` when all are taken.
    pub fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.clone().try_acquire_owned().ok()
    }
}

/// The subscription server.
pub struct GqlWsServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    publisher: EventPublisher,
    dispatcher: Mutex<Option<EventDispatcher>>,
    shutdown: Arc<ShutdownCoordinator>,
    slots: Arc<Semaphore>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl GqlWsServer {
    /// Create a server using the `async-graphql` query parser.
    pub fn new(config: ServerConfig, executor: Arc<dyn Executor>) -> Self {
        Self::with_parser(config, executor, Arc::new(AsyncGraphqlParser))
    }

    /// Create a server with a custom query parser.
    pub fn with_parser(
        config: ServerConfig,
        executor: Arc<dyn Executor>,
        parser: Arc<dyn QueryParser>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(parser));
        let (dispatcher, publisher) = EventDispatcher::new(
            registry.clone(),
            executor,
            DispatcherConfig::from_server_config(&config),
        );
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            config,
            slots,
            registry,
            publisher,
            dispatcher: Mutex::new(Some(dispatcher)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve Prometheus metrics on `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn app_state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            session: SessionConfig::from_server_config(&self.config),
            slots: self.slots.clone(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = self.app_state();

        let mut router = Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the dispatcher and serve until shutdown.
    ///
    /// Returns the bound address and the HTTP server task. The dispatcher is
    /// started by the first call only.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;

        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            self.shutdown
                .track(tokio::spawn(dispatcher.run(self.shutdown.token())));
        }

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "http server stopped with error");
            }
        });

        info!(%addr, path = %self.config.path, "gqlws server listening");
        Ok((addr, handle))
    }

    /// Cancel every task and wait up to the configured timeout.
    pub async fn shutdown_gracefully(&self) {
        self.shutdown
            .graceful_shutdown(Some(self.config.shutdown_timeout()))
            .await;
    }

    /// Handle for publishing events.
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// The connection registry.
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

/// GET on the subscriptions path: `graphql-ws` upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(slot) = state.reserve_slot() else {
        warn!("connection limit reached");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let coordinator = state.shutdown;
    let registry = state.registry;
    let session = state.session;

    ws.protocols([SUBPROTOCOL])
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let token = coordinator.token();
            let handle = tokio::spawn(async move {
                run_ws_session(socket, ConnectionId::new(), user_agent, registry, session, token)
                    .await;
                drop(slot);
            });
            // graceful shutdown waits for the session to flush its `complete`s
            coordinator.track(handle);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    let subscriptions = state.registry.subscription_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        subscriptions,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => crate::metrics::render(&handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
