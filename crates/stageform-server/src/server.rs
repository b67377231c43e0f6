use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::AdmissionError;
use crate::health::health_check;
use crate::supervisor::Supervisor;
use crate::transport::split_websocket;

/// Header carried by a rejected upgrade.
pub const FAILURE_HEADER: &str = "failure";
pub const FAILURE_MESSAGE: &str = "stage cannot be created at this time";

const HOMEPAGE: &str = "stageform\n\nOpen a WebSocket on /on and send {\"type\": ..., \"data\": ...} envelopes.\n";

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub start_time: Instant,
    pub max_message_size: usize,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, config: &ServerConfig) -> Self {
        Self {
            supervisor,
            start_time: Instant::now(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(homepage))
        .route("/health", get(health_handler))
        .route("/on", get(on_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener and serve in the background.
pub async fn start(
    config: &ServerConfig,
    supervisor: Arc<Supervisor>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState::new(Arc::clone(&supervisor), config));
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    info!(%addr, capacity = supervisor.capacity(), "stageform server listening");

    let stop = CancellationToken::new();
    let signal = stop.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        addr,
        supervisor,
        stop,
        server,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    addr: SocketAddr,
    supervisor: Arc<Supervisor>,
    stop: CancellationToken,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Stop accepting connections, end live sessions and wait up to `timeout`.
    ///
    /// Returns `false` if sessions were still running when the timeout elapsed.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.stop.cancel();
        let drained = self.supervisor.shutdown(timeout).await;
        if tokio::time::timeout(timeout, self.server).await.is_err() {
            warn!("http listener did not stop within {timeout:?}");
        }
        drained
    }
}

async fn homepage() -> &'static str {
    HOMEPAGE
}

async fn health_handler(State(state): State<AppState>) -> Json<crate::health::HealthResponse> {
    Json(health_check(
        state.start_time,
        state.supervisor.live_count(),
        state.supervisor.capacity(),
    ))
}

/// WebSocket upgrade handler. Admission happens before the upgrade.
async fn on_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let permit = match state.supervisor.reserve() {
        Ok(permit) => permit,
        Err(err) => return rejection(&err),
    };

    let session_id = permit.id().clone();
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(%session_id, error = %e, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let (reader, writer) = split_websocket(socket);
            // Detached; the supervisor tracks the worker.
            let _ = permit.start(reader, writer);
        })
}

fn rejection(err: &AdmissionError) -> Response {
    info!(reason = %err, "connection refused");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(FAILURE_HEADER, FAILURE_MESSAGE)],
        err.to_string(),
    )
        .into_response()
}
