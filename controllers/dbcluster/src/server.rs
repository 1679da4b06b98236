//! HTTP server for the admission webhook, probes and metrics.
//!
//! TLS is used when both a certificate and key path are configured, which is
//! what the API server requires to call the admission endpoints.

use crate::admission::webhook::{mutate_handler, validate_handler, WebhookState};
use crate::config::Config;
use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn metrics_handler(State(state): State<Arc<WebhookState>>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Routes served by the controller. Admission routes are only mounted when enabled.
pub fn router(state: Arc<WebhookState>, webhook_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(|| async { StatusCode::OK }))
        .route("/metrics", get(metrics_handler));
    if webhook_enabled {
        router = router
            .route("/admission/mutate", post(mutate_handler).layer(TraceLayer::new_for_http()))
            .route("/admission/validate", post(validate_handler).layer(TraceLayer::new_for_http()));
    }
    router.with_state(state)
}

/// Serve until a shutdown signal arrives on `shutdown`.
pub async fn serve(
    config: Config,
    state: Arc<WebhookState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    let app = router(state, config.webhook_enabled);

    let handle = Handle::new();
    let signal = handle.clone();
    tokio::spawn(async move {
        let _res = shutdown.recv().await;
        signal.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    match (&config.webhook_cert_path, &config.webhook_key_path) {
        (Some(cert), Some(key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| ControllerError::Webhook(format!("TLS config error: {}", e)))?;
            info!(addr = %config.webhook_addr, "Starting webhook server with TLS");
            axum_server::bind_rustls(config.webhook_addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        _ => {
            info!(addr = %config.webhook_addr, "Starting probe server without TLS");
            axum_server::bind(config.webhook_addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    }
    .map_err(|e| ControllerError::Webhook(format!("Server error: {}", e)))?;

    info!("Webhook server stopped");
    Ok(())
}
