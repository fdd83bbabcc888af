//! HTTP server: JSON API under `/api/v1`, the `/api/ws` socket and the CalDAV tree.

pub mod api;
pub mod auth;
pub mod ws;

use crate::broadcast::ConnectionHub;
use crate::caldav;
use crate::config::ServerConfig;
use crate::logging::{Logger, next_request_id};
use crate::service::{Context, TaskService};
use anyhow::Context as _;
use axum::Router;
use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use auth::AuthUser;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
    pub hub: Arc<ConnectionHub>,
    /// Flips to `true` when the process is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        service: Arc<TaskService>,
        hub: Arc<ConnectionHub>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            hub,
            shutdown,
        }
    }

    /// Fresh request context: named logger, new request id, process shutdown as cancellation.
    pub fn context(&self, name: &str) -> Context {
        let logger = Logger::new()
            .with_name(name)
            .with_request_id(next_request_id());
        Context::new(logger).with_cancel(self.shutdown.clone())
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Build the router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", api::routes())
        .route("/api/ws", axum::routing::get(ws::upgrade))
        .merge(caldav::routes())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            error!("HTTP server task failed: {}", e);
        }
    }
}

/// Bind `config.bind_addr()` and serve in the background.
pub async fn start_server(state: AppState, config: &ServerConfig) -> anyhow::Result<ServerHandle> {
    let app = build_router(state, config);
    let bind = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    let addr = listener.local_addr()?;

    info!("Task Wizard listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("HTTP server shutting down");
            })
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join,
    })
}
