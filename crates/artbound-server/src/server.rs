//! HTTP server implementation using Axum.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use artbound_core::ArtCache;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{handle_clear, handle_get, handle_health, handle_status, handle_update};

/// URL prefix the cache directory is served under.
pub const CACHE_ROUTE: &str = "/art";

/// URL prefix the static assets are served under.
pub const STATIC_ROUTE: &str = "/static";

/// Application state shared across handlers.
pub struct AppState {
    pub cache: Arc<ArtCache>,
}

/// Build the router: API routes plus the cache and static directories.
pub fn router(state: Arc<AppState>, cache_dir: &Path, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(handle_status))
        .route("/health", get(handle_health))
        .route("/update", post(handle_update))
        .route("/get", get(handle_get))
        .route("/clear", post(handle_clear))
        .nest_service(CACHE_ROUTE, ServeDir::new(cache_dir))
        .nest_service(STATIC_ROUTE, ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(app: Router, addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
