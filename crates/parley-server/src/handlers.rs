//! HTTP routes and server lifecycle.
//!
//! `/` serves the chat page, `/room` upgrades to a WebSocket and hands the
//! connection to the hub, `/health` reports status.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MeteredConnection};
use crate::page::{self, ChatPage};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use parley_core::{serve_connection, Hub, HubHandle, WriterTracer};
use parley_transport::WebSocketConnection;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
    /// Chat page renderer.
    pub page: ChatPage,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(hub: HubHandle, config: Config) -> Self {
        Self {
            hub,
            config,
            page: ChatPage::new(),
        }
    }
}

/// Create the hub described by `config` and start its loop.
pub fn start_hub(config: &Config) -> (HubHandle, JoinHandle<()>) {
    let (hub, handle) = Hub::new(config.hub_config());
    let task = if config.trace {
        hub.with_tracer(WriterTracer::stdout()).spawn()
    } else {
        hub.spawn()
    };
    (handle, task)
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page_handler))
        .route("/room", get(room_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to listen on {}", config.addr))?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, hub_task) = start_hub(&config);
    if config.metrics.enabled {
        tokio::spawn(metrics::watch_hub(hub.watch_stats()));
    }

    let state = Arc::new(AppState::new(hub, config));
    serve(listener, state, shutdown_signal()).await?;

    hub_task.await.context("Hub task failed")?;
    info!("Parley stopped");
    Ok(())
}

/// Serve on `listener` until `signal` resolves, then stop the hub.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Parley listening on {}", addr);
    info!("Chat room endpoint: ws://{}/room", addr);

    let hub = state.hub.clone();
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        info!("Shutting down");
        hub.shutdown();
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Chat page handler.
async fn page_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Html<String> {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| page::is_plain_authority(host))
        .map(str::to_owned)
        .unwrap_or_else(|| fallback_host(&state.config.addr));

    Html(state.page.render(&host))
}

fn fallback_host(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("localhost{}", addr)
    } else {
        addr.to_string()
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": if state.hub.is_shutdown() { "stopping" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "members": stats.members,
    }))
}

/// WebSocket upgrade handler for the chat room.
async fn room_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    let max_message_size = state.config.limits.max_message_size;

    ws.max_message_size(max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(remote = %remote, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let conn = WebSocketConnection::new(socket, Some(remote))
                .with_max_message_size(max_message_size);
            let conn = MeteredConnection::new(Box::new(conn));
            serve_connection(hub, Box::new(conn)).await;
        })
}
