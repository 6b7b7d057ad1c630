// src/server.rs

//! Status and maintenance endpoints over a [`PoolRegistry`].

use crate::error::{preview_key, AppError, Result};
use crate::registry::PoolRegistry;
use crate::storage::KeyStatus;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Shared state of the HTTP handlers.
pub struct ServerState {
    pub registry: PoolRegistry,
    pub start_time: Instant,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl ServerState {
    pub fn new(registry: PoolRegistry) -> Self {
        Self {
            registry,
            start_time: Instant::now(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub pools: Vec<PoolSummary>,
}

#[derive(Debug, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub total_keys: usize,
    pub available_keys: usize,
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/pools/:name/keys", get(list_keys))
        .route("/pools/:name/keys", delete(reset_pool))
        .route("/pools/:name/keys/:key/reset", post(reset_key));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(crate::metrics::metrics_handler));

    router
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

/// Adds a request id and logs the outcome of every request.
async fn trace_requests(mut req: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %req.method(),
        url.path = %req.uri().path(),
    );
    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }
        info!(
            http.response.duration = ?start_time.elapsed(),
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );
        response
    }
    .instrument(span)
    .await
}

/// Liveness plus a per-pool availability summary.
#[axum::debug_handler]
pub async fn health(State(state): State<Arc<ServerState>>) -> Result<Json<HealthStatus>> {
    let mut pools = Vec::with_capacity(state.registry.len());
    for client in state.registry.iter() {
        let statuses = client.pool().get_status().await?;
        pools.push(PoolSummary {
            name: client.pool().name().to_string(),
            total_keys: statuses.len(),
            available_keys: statuses.iter().filter(|s| s.is_available()).count(),
        });
    }

    Ok(Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        pools,
    }))
}

/// Every key status of a pool, keys previewed.
#[axum::debug_handler]
pub async fn list_keys(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<KeyStatus>>> {
    let statuses = state.registry.get(&name)?.pool().get_status().await?;
    let previewed = statuses
        .into_iter()
        .map(|status| KeyStatus {
            key: preview_key(&status.key),
            ..status
        })
        .collect();
    Ok(Json(previewed))
}

/// Clears usage and rate-limit state of one key.
#[axum::debug_handler]
pub async fn reset_key(
    State(state): State<Arc<ServerState>>,
    Path((name, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    let pool = state.registry.get(&name)?.pool();
    if pool.get_key_status(&key).await?.is_none() {
        return Err(AppError::key_not_found(&key));
    }
    pool.reset_key(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Removes every key status of a pool. Keys come back on the next
/// initialization.
#[axum::debug_handler]
pub async fn reset_pool(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.registry.get(&name)?.pool().reset().await?;
    Ok(StatusCode::NO_CONTENT)
}
