use axum::{extract::State, http::header, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::server::ServerState;

/// Installs the global Prometheus recorder. Only one recorder can be
/// installed per process.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::internal(format!("Failed to install Prometheus recorder: {e}")))?;
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// Renders the Prometheus text exposition, or an empty body when no
/// recorder was installed.
pub async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
