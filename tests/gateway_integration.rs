//! End-to-end scenarios against real local HTTP servers standing in for a
//! registry and a set of CometBFT-shaped upstreams (spec §8 scenarios).
//! No mocking crate: a throwaway axum server bound to an ephemeral port
//! plays both roles, the same way the gateway itself is driven in
//! production.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use cometbft_gateway::config::{ChainConfig, Settings};
use cometbft_gateway::core::ChainInstance;
use cometbft_gateway::services::metrics::{EndpointMetricsCollector, MetricsRegistry};
use serde_json::{json, Value};
use tokio::net::TcpListener;

fn test_metrics() -> Arc<EndpointMetricsCollector> {
    Arc::new(EndpointMetricsCollector::new(MetricsRegistry::new().unwrap()))
}

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn status_body(height: &str, earliest: &str, catching_up: bool) -> Value {
    json!({
        "result": {
            "sync_info": {
                "latest_block_height": height,
                "earliest_block_height": earliest,
                "catching_up": catching_up,
            }
        }
    })
}

fn chain_cfg(name: &str, registry_url: String) -> ChainConfig {
    ChainConfig {
        name: name.to_string(),
        display_name: name.to_string(),
        registry_url,
        base_prefix: format!("/{name}"),
        archive_prefix: format!("/{name}/archive"),
    }
}

fn fast_settings() -> Settings {
    let mut s = Settings::default();
    s.health_check_timeout_ms = 2_000;
    s.health_check_interval_ms = 60_000; // tests drive probes explicitly
    s.registry_update_interval_ms = 600_000;
    s.request_timeout_ms = 2_000;
    s.retry_delay_ms = 10;
    s
}

#[tokio::test]
async fn happy_path_routes_to_sole_archive_endpoint() {
    let upstream = Router::new().route(
        "/status",
        get(|| async { Json(status_body("1000", "1", false)) }),
    );
    let upstream_url = spawn(upstream).await;

    let registry = Router::new().route(
        "/list",
        get(move || {
            let upstream_url = upstream_url.clone();
            async move {
                Json(json!([
                    { "RPC Address": upstream_url, "Team or Contributor Name": "T1" }
                ]))
            }
        }),
    );
    let registry_url = format!("{}/list", spawn(registry).await);

    let settings = fast_settings();
    let chain = ChainInstance::new(chain_cfg("main", registry_url), &settings, test_metrics());
    chain.initialize().await.unwrap();

    let status = chain.status().await;
    assert_eq!(status.healthy_count, 1);
    assert_eq!(status.archive_count, 1);

    let outcome = chain
        .route(
            cometbft_gateway::core::RouteOptions {
                is_archive: false,
                is_get: true,
                request_path: "/status".to_string(),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, 200);
    let body: Value = serde_json::from_slice(&outcome.data).unwrap();
    assert_eq!(body["result"]["sync_info"]["latest_block_height"], "1000");
}

#[tokio::test]
async fn sync_gate_excludes_stale_endpoint() {
    let fresh = Router::new().route(
        "/status",
        get(|| async { Json(status_body("1000", "5", false)) }),
    );
    let fresh_url = spawn(fresh).await;
    let stale = Router::new().route(
        "/status",
        get(|| async { Json(status_body("500", "5", false)) }),
    );
    let stale_url = spawn(stale).await;

    let registry = Router::new().route(
        "/list",
        get(move || {
            let (a, b) = (fresh_url.clone(), stale_url.clone());
            async move {
                Json(json!([
                    { "RPC Address": a, "Team or Contributor Name": "fresh" },
                    { "RPC Address": b, "Team or Contributor Name": "stale" },
                ]))
            }
        }),
    );
    let registry_url = format!("{}/list", spawn(registry).await);

    let settings = fast_settings();
    let chain = ChainInstance::new(chain_cfg("main", registry_url), &settings, test_metrics());
    chain.initialize().await.unwrap();

    let status = chain.status().await;
    assert_eq!(status.median_height, 1000);
    assert_eq!(status.healthy_count, 1);
}

#[tokio::test]
async fn archive_routing_never_selects_non_archive_endpoint() {
    let archive = Router::new().route(
        "/status",
        get(|| async { Json(status_body("1000", "1", false)) }),
    );
    let archive_url = spawn(archive).await;
    let regular = Router::new().route(
        "/status",
        get(|| async { Json(status_body("1000", "900", false)) }),
    );
    let regular_url = spawn(regular).await;

    let registry = Router::new().route(
        "/list",
        get(move || {
            let (a, b) = (archive_url.clone(), regular_url.clone());
            async move {
                Json(json!([
                    { "RPC Address": a, "Team or Contributor Name": "archive" },
                    { "RPC Address": b, "Team or Contributor Name": "regular" },
                ]))
            }
        }),
    );
    let registry_url = format!("{}/list", spawn(registry).await);

    let settings = fast_settings();
    let chain = ChainInstance::new(chain_cfg("main", registry_url), &settings, test_metrics());
    chain.initialize().await.unwrap();

    let status = chain.status().await;
    assert_eq!(status.healthy_count, 2);
    assert_eq!(status.archive_count, 1);

    for _ in 0..5 {
        let outcome = chain
            .route(
                cometbft_gateway::core::RouteOptions {
                    is_archive: true,
                    is_get: true,
                    request_path: "/status".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&outcome.data).unwrap();
        assert_eq!(body["result"]["sync_info"]["earliest_block_height"], "1");
    }
}

#[tokio::test]
async fn all_retries_fail_surfaces_all_attempts_failed_with_upstream_status() {
    let hits = Arc::new(AtomicUsize::new(0));

    // Probe and forward hit the same origin, the way one real endpoint
    // serves both /status and the JSON-RPC root.
    let combined = Router::new()
        .route(
            "/status",
            get(|| async { Json(status_body("1000", "1", false)) }),
        )
        .route(
            "/",
            post(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::BAD_GATEWAY, "boom")
                }
            }),
        );
    let combined_url = spawn(combined).await;

    let registry = Router::new().route(
        "/list",
        get(move || {
            let url = combined_url.clone();
            async move { Json(json!([{ "RPC Address": url, "Team or Contributor Name": "t" }])) }
        }),
    );
    let registry_url = format!("{}/list", spawn(registry).await);

    let mut settings = fast_settings();
    settings.retry_attempts = 3;
    let chain = ChainInstance::new(chain_cfg("main", registry_url), &settings, test_metrics());
    chain.initialize().await.unwrap();

    let err = chain
        .route(
            cometbft_gateway::core::RouteOptions {
                is_archive: false,
                is_get: false,
                request_path: String::new(),
            },
            Some(br#"{"jsonrpc":"2.0","method":"status","id":1}"#.to_vec()),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        cometbft_gateway::core::GatewayError::AllAttemptsFailed { .. }
    ));
    let (status, _) = err.upstream_http().unwrap();
    assert_eq!(status, 502);
}
