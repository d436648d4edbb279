//! `RpcServer`: axum HTTP + WebSocket front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wsrpc_core::Codec;

use crate::config::{HEALTH_PATH, ServerConfig};
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::health::{self, HealthResponse};
use crate::pool::WorkerPool;
use crate::registry::MethodRegistry;
use crate::session::{SessionSettings, run_session};
use crate::shutdown::ShutdownCoordinator;

/// Error starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address from the config.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Other socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Dispatcher,
    shutdown: Arc<ShutdownCoordinator>,
    settings: SessionSettings,
    write_timeout: Duration,
    max_message_size: usize,
    start_time: Instant,
}

/// The RPC server.
pub struct RpcServer {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    codec: Arc<dyn Codec>,
    pool: Arc<WorkerPool>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RpcServer {
    /// Create a server serving the handlers in `registry`.
    ///
    /// Spawns the worker pool, so this must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig, registry: MethodRegistry) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let pool = Arc::new(WorkerPool::new(
            config.pool_capacity,
            config.pool_submit_timeout(),
            shutdown.child_token(),
        ));
        Self {
            codec: config.codec.build(),
            config,
            registry: Arc::new(registry),
            pool,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Replace the envelope codec chosen by the config.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Build the axum router: `GET /health` and the WebSocket route.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Dispatcher::new(
                self.registry.clone(),
                self.pool.clone(),
                self.codec.clone(),
            ),
            shutdown: self.shutdown.clone(),
            settings: SessionSettings::from_config(&self.config),
            write_timeout: self.config.write_timeout(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        };

        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .route(&self.config.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            path = %self.config.path,
            codec = self.codec.name(),
            pool_capacity = self.pool.capacity(),
            methods = ?self.registry.methods(),
            "wsrpc server listening"
        );

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Get the worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.shutdown.active_sessions(),
        state.dispatcher.registry().methods(),
    ))
}

/// GET on the WebSocket path: upgrade and run a session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let limit = state.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, source) = socket.split();
    let connection = Arc::new(Connection::new(
        Box::new(sink),
        state.write_timeout,
        &state.shutdown.token(),
    ));
    let session = run_session(connection, source, state.dispatcher, state.settings);
    let _reason = state.shutdown.track_session(session).await;
}
