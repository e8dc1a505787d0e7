//! Tasklive Web Server
//!
//! Axum-based HTTP API for tasks plus the WebSocket channel that pushes
//! `taskAdded`, `taskUpdated` and `taskDeleted` events.

pub mod error;
pub mod origin;
pub mod routes;
pub mod state;
pub mod websocket;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, put},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tasklive_core::{Broadcaster, ChangeFeedListener, ChangeSource, EmissionPolicy, TaskStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use error::ApiError;
use state::AppState;

/// Runtime settings for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub emission_policy: EmissionPolicy,
    pub listener_name: String,
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            emission_policy: EmissionPolicy::Feed,
            listener_name: "default".to_string(),
            broadcast_capacity: tasklive_core::broadcast::DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Allowed origins as header values; entries that are not valid header text are an error.
    pub fn origin_headers(&self) -> anyhow::Result<Vec<HeaderValue>> {
        self.allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim_end_matches('/'))
                    .with_context(|| format!("invalid allowed origin: {}", origin))
            })
            .collect()
    }
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = origin::cors_layer(&state.allowed_origins);

    Router::new()
        .route("/", get(routes::root::index))
        .route(
            "/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/tasks/{id}",
            put(routes::tasks::update_category).delete(routes::tasks::delete_task),
        )
        .route("/task/{id}", put(routes::tasks::update_details))
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(middleware::from_fn_with_state(state.clone(), origin::origin_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Owns the process-wide resources: store, change source, broadcaster and the
/// listener task that ties them together.
pub struct Server {
    config: ServerConfig,
    store: Arc<dyn TaskStore>,
    source: Arc<dyn ChangeSource>,
    broadcaster: Broadcaster,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<dyn TaskStore>, source: Arc<dyn ChangeSource>) -> Self {
        let broadcaster = Broadcaster::new(config.broadcast_capacity);
        Self {
            config,
            store,
            source,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` resolves, then drain and stop the feed.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let origins = self.config.origin_headers()?;

        let feed = ChangeFeedListener::open(
            self.config.listener_name.clone(),
            self.source.clone(),
            self.broadcaster.clone(),
        )
        .await
        .context("failed to open change feed subscription")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed_task = tokio::spawn(feed.run(shutdown_rx.clone()));

        let state = AppState::new(
            self.store.clone(),
            self.broadcaster.clone(),
            self.config.emission_policy,
            origins,
            shutdown_rx,
        );
        let app = create_router(state);

        let local = listener.local_addr()?;
        info!(
            addr = %local,
            policy = %self.config.emission_policy,
            "Web server listening on http://{}",
            local
        );

        let notify = shutdown_tx.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                info!("Shutdown requested, draining connections");
                let _ = notify.send(true);
            })
            .await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = feed_task.await {
            warn!(error = %e, "Change feed task ended abnormally");
        }
        info!("Server stopped");
        served.context("server error")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests;
