use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{ChainConfig, Settings};
use crate::services::metrics::EndpointMetricsCollector;

use super::balancer::{Forward, LoadBalancer, RouteResult, Target};
use super::endpoint::Endpoint;
use super::error::GatewayError;
use super::health::{HealthEvent, HealthMonitor, Pools};
use super::registry::RegistryPoller;

/// `uninitialized → initializing → ready | degraded → stopping → stopped`
/// (spec.md §4.4). `stopping`/`stopped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub chain: String,
    pub display_name: String,
    pub state: ChainState,
    pub all_count: usize,
    pub healthy_count: usize,
    pub archive_count: usize,
    pub median_height: u64,
    pub last_probe: Option<DateTime<Utc>>,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
}

pub struct RouteOptions {
    pub is_archive: bool,
    pub is_get: bool,
    pub request_path: String,
}

#[derive(Debug)]
pub struct RouteOutcome {
    pub data: Vec<u8>,
    pub selected: String,
    pub response_time_ms: u64,
    pub status: u16,
}

/// Composes one Registry Poller, Health Monitor and Load Balancer for a
/// single chain, and mediates the events between them (spec.md §4.4).
pub struct ChainInstance {
    pub key: String,
    config: ChainConfig,
    poller: Arc<RegistryPoller>,
    monitor: Arc<HealthMonitor>,
    balancer: Arc<LoadBalancer>,
    state: RwLock<ChainState>,
    wiring_tasks: Mutex<Vec<JoinHandle<()>>>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    avg_response_time_ms: Mutex<f64>,
    metrics: Arc<EndpointMetricsCollector>,
}

impl ChainInstance {
    pub fn new(
        config: ChainConfig,
        settings: &Settings,
        metrics: Arc<EndpointMetricsCollector>,
    ) -> Arc<Self> {
        let poller = Arc::new(RegistryPoller::new(
            config.name.clone(),
            config.registry_url.clone(),
            Duration::from_millis(settings.registry_update_interval_ms),
            settings.registry_max_retries,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            config.name.clone(),
            Duration::from_millis(settings.health_check_timeout_ms),
            Duration::from_millis(settings.health_check_interval_ms),
            settings.sync_threshold_blocks,
        ));
        let balancer = Arc::new(LoadBalancer::new(
            config.name.clone(),
            settings.retry_attempts,
            Duration::from_millis(settings.retry_delay_ms),
            Duration::from_millis(settings.request_timeout_ms),
            Arc::clone(&metrics),
        ));
        Arc::new(Self {
            key: config.name.clone(),
            config,
            poller,
            monitor,
            balancer,
            state: RwLock::new(ChainState::Uninitialized),
            wiring_tasks: Mutex::new(Vec::new()),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            avg_response_time_ms: Mutex::new(0.0),
            metrics,
        })
    }

    /// (1) synchronous registry fetch — failure aborts initialization;
    /// (2) synchronous probe round; (3) publish initial pools to the
    /// balancer; (4) start the periodic schedulers and wire their events.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), GatewayError> {
        *self.state.write().await = ChainState::Initializing;

        let initial = self.poller.fetch().await?;
        self.monitor.set_endpoints(initial).await;
        self.monitor.probe_all().await;

        let pools = self.monitor.current_pools();
        self.balancer
            .update_pools(pools.healthy.clone(), pools.archive.clone());
        self.publish_pool_metrics(&pools);

        self.wire_events().await;

        self.poller.start().await;
        self.monitor.start().await;

        self.refresh_state().await;
        Ok(())
    }

    async fn wire_events(self: &Arc<Self>) {
        let mut tasks = self.wiring_tasks.lock().await;

        let mut registry_rx = self.poller.subscribe();
        let monitor_for_registry = Arc::clone(&self.monitor);
        registry_rx.borrow_and_update();
        tasks.push(tokio::spawn(async move {
            loop {
                if registry_rx.changed().await.is_err() {
                    break;
                }
                let snapshot = registry_rx.borrow_and_update().clone();
                monitor_for_registry
                    .set_endpoints(snapshot.entries().to_vec())
                    .await;
            }
        }));

        let mut pools_rx = self.monitor.subscribe_pools();
        let balancer_for_pools = Arc::clone(&self.balancer);
        let this = Arc::clone(self);
        pools_rx.borrow_and_update();
        tasks.push(tokio::spawn(async move {
            loop {
                if pools_rx.changed().await.is_err() {
                    break;
                }
                let pools = pools_rx.borrow_and_update().clone();
                balancer_for_pools.update_pools(pools.healthy.clone(), pools.archive.clone());
                this.publish_pool_metrics(&pools);
                this.refresh_state().await;
            }
        }));

        let mut events_rx = self.monitor.subscribe_events();
        let chain_name = self.key.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(HealthEvent::RpcRecovered { url }) => {
                        tracing::info!(chain = %chain_name, url = %url, "endpoint recovered");
                    }
                    Ok(HealthEvent::AllUnhealthy) => {
                        tracing::warn!(chain = %chain_name, "all endpoints unhealthy");
                    }
                    Ok(HealthEvent::HealthChanged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn publish_pool_metrics(&self, pools: &Pools) {
        self.metrics.set_pool_size(&self.key, "healthy", pools.healthy.len());
        self.metrics.set_pool_size(&self.key, "archive", pools.archive.len());
        self.metrics.set_median_height(&self.key, pools.median_height);
    }

    async fn refresh_state(&self) {
        let mut state = self.state.write().await;
        if matches!(*state, ChainState::Stopping | ChainState::Stopped) {
            return;
        }
        let pools = self.monitor.current_pools();
        *state = if pools.healthy.is_empty() {
            ChainState::Degraded
        } else {
            ChainState::Ready
        };
    }

    pub async fn route(&self, opts: RouteOptions, body: Option<Vec<u8>>) -> Result<RouteOutcome, GatewayError> {
        let target = if opts.is_archive { Target::Archive } else { Target::Regular };
        let forward = if opts.is_get {
            Forward::Get { request_path: opts.request_path }
        } else {
            Forward::Post { body: body.unwrap_or_default() }
        };

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.balancer.route(target, forward).await {
            Ok(RouteResult { body, selected, response_time_ms, status }) => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                let mut avg = self.avg_response_time_ms.lock().await;
                *avg = if *avg == 0.0 {
                    response_time_ms as f64
                } else {
                    0.8 * *avg + 0.2 * response_time_ms as f64
                };
                Ok(RouteOutcome {
                    data: body,
                    selected,
                    response_time_ms,
                    status,
                })
            }
            Err(e) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn status(&self) -> ChainStatus {
        let pools = self.monitor.current_pools();
        let last_probe = pools.all.iter().filter_map(|e| e.last_probe).max();
        ChainStatus {
            chain: self.key.clone(),
            display_name: self.config.display_name.clone(),
            state: *self.state.read().await,
            all_count: pools.all.len(),
            healthy_count: pools.healthy.len(),
            archive_count: pools.archive.len(),
            median_height: pools.median_height,
            last_probe,
            endpoints: pools.all.clone(),
        }
    }

    pub async fn metrics(&self) -> ChainMetrics {
        let total = self.total_requests.load(Ordering::Relaxed);
        let success = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        ChainMetrics {
            total_requests: total,
            successful_requests: success,
            failed_requests: failed,
            avg_response_time_ms: *self.avg_response_time_ms.lock().await,
            success_rate: if total == 0 { 1.0 } else { success as f64 / total as f64 },
        }
    }

    pub async fn refresh_registry(&self) -> Result<(), GatewayError> {
        self.poller.force().await?;
        Ok(())
    }

    pub async fn probe_now(&self) {
        self.monitor.probe_all().await;
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == ChainState::Ready
    }

    /// Idempotent: calling this twice produces the same terminal state and
    /// no additional side effects.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ChainState::Stopped {
                return;
            }
            *state = ChainState::Stopping;
        }
        self.poller.stop().await;
        self.monitor.stop().await;
        for task in self.wiring_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.balancer.clear().await;
        *self.state.write().await = ChainState::Stopped;
    }
}
