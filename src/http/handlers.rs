use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core::{ChainMetrics, ChainStatus, RouteOptions};

use super::error::ApiError;
use super::state::AppState;

#[derive(Serialize)]
pub struct HealthzResponse {
    status: &'static str,
}

/// Liveness probe: the process is up. Never reflects upstream health.
pub async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

#[derive(Serialize)]
struct ReadyzResponse {
    ready: bool,
    chains_ready: usize,
    chains_total: usize,
}

/// Readiness probe: ready iff every configured chain has at least one
/// healthy endpoint (spec.md §4.5 aggregate status).
pub async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let status = state.manager.aggregate_status().await;
    let body = ReadyzResponse {
        ready: status.ready,
        chains_ready: status.chains_ready,
        chains_total: status.chains_total,
    };
    if status.ready {
        (axum::http::StatusCode::OK, Json(body)).into_response()
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

pub async fn chain_status(
    State(state): State<Arc<AppState>>,
    Path(chain): Path<String>,
) -> Result<Json<ChainStatus>, ApiError> {
    let instance = state
        .manager
        .chain(&chain)
        .ok_or_else(|| ApiError::new(
            crate::core::GatewayError::ChainNotFound { path: chain.clone() },
            format!("/status/{chain}"),
        ))?;
    Ok(Json(instance.status().await))
}

#[derive(Serialize)]
pub struct ChainsMetricsResponse {
    chains: Vec<(String, ChainMetrics)>,
}

pub async fn chains_metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.manager.aggregate_status().await;
    let mut out = serde_json::Map::new();
    for chain_status in &status.chains {
        if let Some(instance) = state.manager.chain(&chain_status.chain) {
            let metrics = instance.metrics().await;
            out.insert(chain_status.chain.clone(), serde_json::to_value(metrics).unwrap());
        }
    }
    Json(serde_json::Value::Object(out))
}

/// Prometheus text-format scrape endpoint.
pub async fn metrics_export(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.export() {
        Ok(body) => (
            axum::http::StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            e.to_string(),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
pub struct RefreshResponse {
    chain: String,
    refreshed: bool,
}

/// Force an out-of-cycle registry refresh for one chain (spec.md §6
/// operational endpoints).
pub async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    Path(chain): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let instance = state
        .manager
        .chain(&chain)
        .ok_or_else(|| ApiError::new(
            crate::core::GatewayError::ChainNotFound { path: chain.clone() },
            format!("/admin/{chain}/refresh"),
        ))?;
    instance
        .refresh_registry()
        .await
        .map_err(|e| ApiError::new(e, format!("/admin/{chain}/refresh")))?;
    Ok(Json(RefreshResponse { chain, refreshed: true }))
}

/// Catch-all proxy route: resolves the chain from the path prefix, forwards
/// GET as a GET (path + query appended verbatim) and everything else as a
/// byte-preserving POST of the request body (spec.md §4.1 resolved open
/// question).
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    _headers: HeaderMap,
    RawQuery(query): RawQuery,
    uri: axum::http::Uri,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    let full_path = match &query {
        Some(q) => format!("{}?{}", uri.path(), q),
        None => uri.path().to_string(),
    };
    let (chain, is_archive, remainder) = state
        .manager
        .resolve(uri.path())
        .map_err(|e| ApiError::new(e, full_path.clone()))?;

    let is_get = method == Method::GET;
    let opts = RouteOptions {
        is_archive,
        is_get,
        request_path: remainder,
    };
    let body_bytes = if is_get { None } else { Some(body.to_vec()) };

    let request_start = std::time::Instant::now();
    let outcome = chain
        .route(opts, body_bytes)
        .await
        .map_err(|e| ApiError::new(e, full_path.clone()))?;
    let total_ms = request_start.elapsed().as_millis();

    let mut response = (
        axum::http::StatusCode::from_u16(outcome.status).unwrap_or(axum::http::StatusCode::OK),
        outcome.data,
    )
        .into_response();
    let headers = response.headers_mut();
    headers.insert("x-response-time", total_ms.to_string().parse().unwrap());
    headers.insert(
        "x-selected-rpc",
        outcome
            .selected
            .parse()
            .unwrap_or_else(|_| axum::http::HeaderValue::from_static("")),
    );
    headers.insert(
        "x-rpc-response-time",
        outcome.response_time_ms.to_string().parse().unwrap(),
    );
    headers.insert(
        "x-is-archive",
        axum::http::HeaderValue::from_static(if is_archive { "true" } else { "false" }),
    );
    Ok(response)
}
