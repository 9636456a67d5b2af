use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::services::metrics::metrics_middleware;

use super::handlers::{admin_refresh, chain_status, chains_metrics, healthz, metrics_export, proxy, readyz};
use super::state::AppState;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let operational = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status/{chain}", get(chain_status))
        .route("/metrics/chains", get(chains_metrics))
        .route("/metrics", get(metrics_export))
        .route("/admin/{chain}/refresh", post(admin_refresh));

    operational
        .fallback(proxy)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            metrics_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
