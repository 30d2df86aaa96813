//! Liveness endpoint for the hosting platform.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;

use crate::error::{MokoshError, Result};

/// Answers `200 OK` on `/`, `/health` and any other path.
pub fn router() -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .fallback(health_handler)
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Serve the liveness routes on an already bound listener.
pub async fn serve(listener: TcpListener) -> Result<()> {
    axum::serve(listener, router())
        .await
        .map_err(|e| MokoshError::Io(format!("Health check server failed: {}", e)))
}

/// Bind `0.0.0.0:port` and serve in the background. Failures are logged;
/// the bots keep running without the endpoint.
pub fn spawn_health_server(port: u16) {
    tokio::spawn(async move {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, port, "Failed to bind health check port");
                return;
            }
        };

        tracing::info!(port, "Health check server listening");
        if let Err(e) = serve(listener).await {
            tracing::error!(error = %e, "Health check server stopped");
        }
    });
}
