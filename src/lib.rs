pub mod config;
pub mod core;
pub mod http;
pub mod services;

use std::sync::Arc;

use axum::Router;

use config::{ChainConfig, Settings};
use core::MultiChainManager;
use http::AppState;
use services::metrics::{EndpointMetricsCollector, MetricsRegistry};

/// Builds the manager, initializes every configured chain, and wires the
/// axum router on top. Mirrors the shape of the teacher's `create_app`
/// (construct shared state, then hand it to the router).
pub async fn create_app(
    chains: Vec<ChainConfig>,
    settings: &Settings,
) -> Result<(Router, Arc<MultiChainManager>), core::GatewayError> {
    let metrics = MetricsRegistry::new().expect("metrics registry construction is infallible at startup");
    let collector = Arc::new(EndpointMetricsCollector::new(Arc::clone(&metrics)));

    let manager = Arc::new(MultiChainManager::new(chains, settings, collector));
    manager.initialize_all().await?;

    let state = Arc::new(AppState {
        manager: Arc::clone(&manager),
        metrics,
    });

    let router = http::build_router(state);
    Ok((router, manager))
}
