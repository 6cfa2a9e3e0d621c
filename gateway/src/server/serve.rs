//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::GatewayError;
use crate::server::handlers::{
    audit_handler, cancel_deploy_handler, deploy_handler, deploy_status_handler, health_handler,
    list_services_handler, logs_handler, processes_handler, restart_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::storage::settings::ServerSettings;

/// Build the router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Services
        .route("/api/services", get(list_services_handler))
        .route("/api/services/{id}/restart", post(restart_handler))
        .route("/api/services/{id}/logs", get(logs_handler))
        .route("/api/services/{id}/deploy", post(deploy_handler))
        // Deploy jobs
        .route("/api/deploys/{job_id}", get(deploy_status_handler))
        .route("/api/deploys/{job_id}/cancel", post(cancel_deploy_handler))
        // Admin
        .route("/api/processes", get(processes_handler))
        .route("/api/audit", get(audit_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerSettings,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), GatewayError>>, GatewayError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))
    });

    Ok(handle)
}
