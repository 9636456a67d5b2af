use cometbft_gateway::config::{load_gateway_config, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cometbft_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "gateway.json".to_string());
    let (chains, settings) = match load_gateway_config(&config_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, path = %config_path, "no gateway config file found, falling back to env-only settings with zero chains");
            (Vec::new(), Settings::default().apply_env_overrides())
        }
    };

    let port = settings.port;
    let (app, manager) = cometbft_gateway::create_app(chains, &settings)
        .await
        .expect("failed to initialize chain instances");

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    tracing::info!(address = %addr, "gateway listening");

    let shutdown_manager = manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining chains");
            shutdown_manager.shutdown_all().await;
        })
        .await
        .unwrap();
}
