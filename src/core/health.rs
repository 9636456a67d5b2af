use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::task::JoinSet;

use super::endpoint::Endpoint;

const PROBE_PATH: &str = "/status";

/// The two sub-pools plus the `all` set and the median height they were
/// computed against (spec.md §3 "Pool state").
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pools {
    pub all: Vec<Endpoint>,
    pub healthy: Vec<Endpoint>,
    pub archive: Vec<Endpoint>,
    pub median_height: u64,
}

#[derive(Debug, Clone)]
pub enum HealthEvent {
    HealthChanged(Arc<Pools>),
    RpcRecovered { url: String },
    AllUnhealthy,
}

struct ProbeOutcome {
    url: String,
    success: bool,
    height: Option<u64>,
    catching_up: bool,
    is_archive_report: bool,
    response_time_ms: u64,
    error: Option<String>,
}

/// Probes every tracked endpoint on a fixed cadence, classifies each as
/// healthy/archive and republishes the pool views. Mirrors the liveness +
/// classification split the teacher's `EndpointHealth::is_healthy`
/// performs, generalized to the sync-gating rule in spec.md §4.2.
pub struct HealthMonitor {
    chain: String,
    client: reqwest::Client,
    probe_timeout: Duration,
    interval: Duration,
    sync_threshold: u64,
    tracked: RwLock<Vec<Endpoint>>,
    pools_tx: watch::Sender<Arc<Pools>>,
    events_tx: broadcast::Sender<HealthEvent>,
    last_emit: Mutex<Option<(usize, usize, u64)>>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl HealthMonitor {
    pub fn new(chain: String, probe_timeout: Duration, interval: Duration, sync_threshold: u64) -> Self {
        let (pools_tx, _rx) = watch::channel(Arc::new(Pools::default()));
        let (events_tx, _rx2) = broadcast::channel(256);
        Self {
            chain,
            client: reqwest::Client::builder()
                .timeout(probe_timeout)
                .build()
                .unwrap_or_default(),
            probe_timeout,
            interval,
            sync_threshold,
            tracked: RwLock::new(Vec::new()),
            pools_tx,
            events_tx,
            last_emit: Mutex::new(None),
            task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe_pools(&self) -> watch::Receiver<Arc<Pools>> {
        self.pools_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.events_tx.subscribe()
    }

    pub fn current_pools(&self) -> Arc<Pools> {
        self.pools_tx.borrow().clone()
    }

    /// Replace the tracked set. Per-URL probe history is discarded even for
    /// URLs present in both the old and new set — the new set always wins.
    /// Triggers an immediate probe round if the monitor is running.
    pub async fn set_endpoints(self: &Arc<Self>, list: Vec<Endpoint>) {
        *self.tracked.write().await = list;
        if self.running.load(Ordering::SeqCst) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.probe_all().await;
            });
        }
    }

    async fn probe_one(client: reqwest::Client, url: String) -> ProbeOutcome {
        let start = std::time::Instant::now();
        let result = client.get(format!("{url}{PROBE_PATH}")).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => parse_status_body(&url, &body, elapsed_ms),
                Err(e) => ProbeOutcome {
                    url,
                    success: false,
                    height: None,
                    catching_up: true,
                    is_archive_report: false,
                    response_time_ms: elapsed_ms,
                    error: Some(format!("invalid status body: {e}")),
                },
            },
            Ok(resp) => ProbeOutcome {
                url,
                success: false,
                height: None,
                catching_up: true,
                is_archive_report: false,
                response_time_ms: elapsed_ms,
                error: Some(format!("HTTP {}", resp.status())),
            },
            Err(e) => ProbeOutcome {
                url,
                success: false,
                height: None,
                catching_up: true,
                is_archive_report: false,
                response_time_ms: elapsed_ms,
                error: Some(e.to_string()),
            },
        }
    }

    /// Probe every tracked endpoint concurrently, fan-out bounded by the
    /// tracked set size, wait for all to settle, recompute pools, and emit
    /// `healthChanged` iff `(|healthy|, |archive|, median)` changed.
    pub async fn probe_all(&self) {
        let before = {
            let tracked = self.tracked.read().await;
            tracked.clone()
        };
        if before.is_empty() {
            return;
        }
        let previously_healthy: std::collections::HashSet<String> = self
            .classify(&before)
            .1
            .iter()
            .map(|e| e.url.clone())
            .collect();
        let previously_any_healthy = !previously_healthy.is_empty();

        let mut set = JoinSet::new();
        for ep in before.iter() {
            let client = self.client.clone();
            let url = ep.url.clone();
            set.spawn(Self::probe_one(client, url));
        }
        let deadline_ms = (self.probe_timeout.as_millis() as f64 * 0.8) as u64;

        let mut updated = before;
        while let Some(res) = set.join_next().await {
            let Ok(outcome) = res else { continue };
            if let Some(ep) = updated.iter_mut().find(|e| e.url == outcome.url) {
                apply_outcome(ep, &outcome, deadline_ms);
            }
        }

        let (healthy, archive, median) = self.classify_with_median(&updated);

        for ep in &healthy {
            if !previously_healthy.contains(&ep.url) {
                let _ = self.events_tx.send(HealthEvent::RpcRecovered { url: ep.url.clone() });
            }
        }
        if previously_any_healthy && healthy.is_empty() {
            let _ = self.events_tx.send(HealthEvent::AllUnhealthy);
        }

        let pools = Arc::new(Pools {
            all: updated.clone(),
            healthy: healthy.clone(),
            archive: archive.clone(),
            median_height: median,
        });

        let triple = (healthy.len(), archive.len(), median);
        let mut last = self.last_emit.lock().await;
        let changed = *last != Some(triple);
        *last = Some(triple);
        drop(last);

        *self.tracked.write().await = updated;
        let _ = self.pools_tx.send(pools.clone());
        if changed {
            let _ = self.events_tx.send(HealthEvent::HealthChanged(pools));
        }
    }

    /// Classify using the monitor's configured sync threshold, returning
    /// `(all, healthy)` — used internally to compute the pre-round healthy
    /// set for recovery/all-unhealthy transition detection.
    fn classify(&self, all: &[Endpoint]) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let (healthy, _archive, _median) = self.classify_with_median(all);
        (all.to_vec(), healthy)
    }

    fn classify_with_median(&self, all: &[Endpoint]) -> (Vec<Endpoint>, Vec<Endpoint>, u64) {
        let median = median_height(all);
        let healthy: Vec<Endpoint> = all
            .iter()
            .filter(|e| e.live && !e.catching_up && height_within_threshold(e.height, median, self.sync_threshold))
            .cloned()
            .collect();
        let archive: Vec<Endpoint> = healthy.iter().filter(|e| e.archive).cloned().collect();
        (healthy, archive, median)
    }

    /// Begin periodic probing, starting immediately.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                this.probe_all().await;
                tokio::time::sleep(this.interval).await;
            }
        });
        *self.task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

fn height_within_threshold(height: Option<u64>, median: u64, threshold: u64) -> bool {
    if median == 0 {
        return false;
    }
    match height {
        Some(h) => h.abs_diff(median) <= threshold,
        None => false,
    }
}

/// Median of reported heights from live endpoints with a known height.
/// `0` if that set is empty. Order-independent: sorts a copy.
fn median_height(all: &[Endpoint]) -> u64 {
    let mut heights: Vec<u64> = all
        .iter()
        .filter(|e| e.live)
        .filter_map(|e| e.height)
        .collect();
    if heights.is_empty() {
        return 0;
    }
    heights.sort_unstable();
    heights[(heights.len() - 1) / 2]
}

fn apply_outcome(ep: &mut Endpoint, outcome: &ProbeOutcome, deadline_ms: u64) {
    ep.last_probe = Some(Utc::now());
    ep.response_time_ms = Some(outcome.response_time_ms);
    if outcome.success && outcome.response_time_ms <= deadline_ms {
        ep.live = true;
        ep.height = outcome.height;
        ep.catching_up = outcome.catching_up;
        ep.archive = outcome.is_archive_report;
        ep.consecutive_failures = 0;
        ep.last_error = None;
    } else {
        ep.live = false;
        ep.consecutive_failures += 1;
        ep.error_count += 1;
        ep.archive = false;
        ep.last_error = outcome
            .error
            .clone()
            .or_else(|| Some("probe exceeded liveness deadline".to_string()));
    }
}

fn parse_status_body(url: &str, body: &Value, elapsed_ms: u64) -> ProbeOutcome {
    let sync_info = body.pointer("/result/sync_info");
    let Some(sync_info) = sync_info else {
        return ProbeOutcome {
            url: url.to_string(),
            success: false,
            height: None,
            catching_up: true,
            is_archive_report: false,
            response_time_ms: elapsed_ms,
            error: Some("missing result.sync_info".to_string()),
        };
    };
    let height = sync_info
        .get("latest_block_height")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok());
    let catching_up = sync_info
        .get("catching_up")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    // Archive detection is a string comparison on the raw payload field,
    // preserved verbatim per spec.md §9 open question.
    let is_archive_report = sync_info
        .get("earliest_block_height")
        .and_then(|v| v.as_str())
        .map(|s| s == "1")
        .unwrap_or(false);

    ProbeOutcome {
        url: url.to_string(),
        success: true,
        height,
        catching_up,
        is_archive_report,
        response_time_ms: elapsed_ms,
        error: None,
    }
}
