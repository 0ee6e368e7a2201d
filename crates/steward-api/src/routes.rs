//! Router setup and server lifecycle.

use std::future::Future;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use steward_core::config::HealthConfig;
use steward_core::error::StewardError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until `shutdown` resolves.
pub async fn start_server<F>(
    config: &HealthConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), StewardError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.bind, config.port);
    let router = create_router(state);

    tracing::info!(addr = %addr, "Starting health server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StewardError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| StewardError::Api(format!("Server error: {}", e)))?;

    tracing::info!("Health server stopped");
    Ok(())
}
