//! Probe and metrics endpoints.

use crate::error::AutoscalerError;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> (StatusCode, String) {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(|| async { StatusCode::OK }))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serve plain HTTP on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), AutoscalerError> {
    let handle = Handle::new();
    let signal = handle.clone();
    tokio::spawn(async move {
        let _res = shutdown.recv().await;
        signal.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!(addr = %addr, "Starting probe server");
    axum_server::bind(addr)
        .handle(handle)
        .serve(router(metrics).into_make_service())
        .await
        .map_err(|e| AutoscalerError::Server(format!("Server error: {}", e)))?;

    info!("Probe server stopped");
    Ok(())
}
