use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use rand::Rng;
use tokio::sync::RwLock;

use crate::services::metrics::EndpointMetricsCollector;

use super::circuit_breaker::CircuitBreaker;
use super::endpoint::Endpoint;
use super::error::GatewayError;
use super::weight::Weight;

/// Which sub-pool a request is routed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Regular,
    Archive,
}

/// Forwarding mode: POST the verbatim JSON body, or GET a path + query
/// string appended to the endpoint's base URL.
#[derive(Debug, Clone)]
pub enum Forward {
    Post { body: Vec<u8> },
    Get { request_path: String },
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub body: Vec<u8>,
    pub selected: String,
    pub response_time_ms: u64,
    pub status: u16,
}

/// Holds the current healthy/archive sub-pools, per-endpoint weights and
/// circuit breakers, and performs weighted selection + retry + forwarding.
/// Weights and breakers are keyed by URL and created lazily, the way the
/// teacher's `RpcManager` lazily populates its `health_tracker` map.
pub struct LoadBalancer {
    chain: String,
    client: reqwest::Client,
    healthy: ArcSwap<Vec<Endpoint>>,
    archive: ArcSwap<Vec<Endpoint>>,
    weights: RwLock<HashMap<String, Weight>>,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    cursor: AtomicUsize,
    retry_attempts: usize,
    retry_delay: Duration,
    request_timeout: Duration,
    metrics: Arc<EndpointMetricsCollector>,
}

const USER_AGENT: &str = "cometbft-gateway/0.1";

impl LoadBalancer {
    pub fn new(
        chain: String,
        retry_attempts: usize,
        retry_delay: Duration,
        request_timeout: Duration,
        metrics: Arc<EndpointMetricsCollector>,
    ) -> Self {
        Self {
            chain,
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
            healthy: ArcSwap::from_pointee(Vec::new()),
            archive: ArcSwap::from_pointee(Vec::new()),
            weights: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            retry_attempts: retry_attempts.max(1),
            retry_delay,
            request_timeout,
            metrics,
        }
    }

    /// Atomically replace both sub-pools. Readers on the request path load
    /// the current `Arc` once per request and never observe a mixture of
    /// pre- and post-update state.
    pub fn update_pools(&self, healthy: Vec<Endpoint>, archive: Vec<Endpoint>) {
        self.healthy.store(Arc::new(healthy));
        self.archive.store(Arc::new(archive));
    }

    fn pool_for(&self, target: Target) -> Arc<Vec<Endpoint>> {
        match target {
            Target::Regular => self.healthy.load_full(),
            Target::Archive => self.archive.load_full(),
        }
    }

    pub async fn route(&self, target: Target, forward: Forward) -> Result<RouteResult, GatewayError> {
        let pool = self.pool_for(target);
        if pool.is_empty() {
            return Err(GatewayError::NoUpstreamsAvailable {
                chain: self.chain.clone(),
            });
        }

        let mut last_err: Option<GatewayError> = None;
        for attempt in 1..=self.retry_attempts {
            let endpoint = if attempt == 1 {
                self.weighted_pick(&pool).await
            } else {
                let cursor = self.cursor.load(Ordering::SeqCst);
                self.retry_pick(&pool, cursor, attempt - 1).await
            };

            let start = std::time::Instant::now();
            let outcome = self.forward_once(&endpoint.url, &forward).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok((status, body)) => {
                    self.record_success(&endpoint.url, elapsed_ms, status).await;
                    self.cursor.fetch_add(1, Ordering::SeqCst);
                    return Ok(RouteResult {
                        body,
                        selected: endpoint.url.clone(),
                        response_time_ms: elapsed_ms,
                        status,
                    });
                }
                Err(e) => {
                    self.record_failure(&endpoint.url, elapsed_ms, &e).await;
                    last_err = Some(e);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay * attempt as u32).await;
                    }
                }
            }
        }
        self.cursor.fetch_add(1, Ordering::SeqCst);
        Err(GatewayError::AllAttemptsFailed {
            cause: Box::new(last_err.unwrap_or(GatewayError::NoUpstreamsAvailable {
                chain: self.chain.clone(),
            })),
        })
    }

    async fn weighted_pick(&self, pool: &[Endpoint]) -> Endpoint {
        let now = Utc::now();
        let open: Vec<String> = {
            let mut breakers = self.breakers.write().await;
            pool.iter()
                .filter(|e| {
                    let allowed = breakers.entry(e.url.clone()).or_default().check_and_allow(now);
                    !allowed
                })
                .map(|e| e.url.clone())
                .collect()
        };
        let candidates: Vec<&Endpoint> = if open.len() == pool.len() {
            pool.iter().collect()
        } else {
            pool.iter().filter(|e| !open.contains(&e.url)).collect()
        };

        let weights = self.weights.read().await;
        // Integer-scaled prefix sums avoid floating point instability
        // while keeping selection a genuine weighted draw (spec.md §9).
        let scaled: Vec<(u32, &Endpoint)> = candidates
            .iter()
            .map(|e| {
                let w = weights.get(&e.url).map(|w| w.value).unwrap_or(1.0);
                (((w * 1000.0).round() as u32).max(1), *e)
            })
            .collect();
        drop(weights);

        let total: u32 = scaled.iter().map(|(w, _)| w).sum();
        if total == 0 {
            return candidates[0].clone();
        }
        let mut r = rand::rng().random_range(0..total);
        for (w, e) in &scaled {
            if r < *w {
                return (*e).clone();
            }
            r -= w;
        }
        scaled.last().map(|(_, e)| (*e).clone()).unwrap()
    }

    async fn retry_pick(&self, pool: &[Endpoint], cursor: usize, k: usize) -> Endpoint {
        let n = pool.len();
        let now = Utc::now();
        let mut breakers = self.breakers.write().await;
        for offset in 0..n {
            let idx = (cursor + k + offset) % n;
            let allowed = breakers
                .entry(pool[idx].url.clone())
                .or_default()
                .check_and_allow(now);
            if allowed {
                return pool[idx].clone();
            }
        }
        pool[(cursor + k) % n].clone()
    }

    async fn forward_once(&self, url: &str, forward: &Forward) -> Result<(u16, Vec<u8>), GatewayError> {
        let request = match forward {
            Forward::Post { body } => self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .timeout(self.request_timeout)
                .body(body.clone()),
            Forward::Get { request_path } => self
                .client
                .get(format!("{url}{request_path}"))
                .timeout(self.request_timeout),
        };

        let resp = request.send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(classify_transport_error)?
            .to_vec();

        if status.as_u16() >= 400 {
            return Err(GatewayError::UpstreamHttpError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok((status.as_u16(), body))
    }

    async fn record_success(&self, url: &str, rt_ms: u64, status: u16) {
        let weight = {
            let mut weights = self.weights.write().await;
            let w = weights.entry(url.to_string()).or_default();
            w.record_success(rt_ms);
            w.value
        };
        let state = {
            let mut breakers = self.breakers.write().await;
            let b = breakers.entry(url.to_string()).or_default();
            b.record_success();
            b.state
        };
        self.metrics
            .record_rpc_request(&self.chain, url, &status.to_string(), rt_ms as f64 / 1000.0);
        self.metrics.set_endpoint_weight(&self.chain, url, weight);
        self.metrics
            .set_circuit_breaker_state(&self.chain, url, state.as_metric_value());
    }

    async fn record_failure(&self, url: &str, rt_ms: u64, err: &GatewayError) {
        let weight = {
            let mut weights = self.weights.write().await;
            let w = weights.entry(url.to_string()).or_default();
            w.record_failure();
            w.value
        };
        let state = {
            let mut breakers = self.breakers.write().await;
            let b = breakers.entry(url.to_string()).or_default();
            b.record_failure(Utc::now());
            b.state
        };
        self.metrics
            .record_rpc_request(&self.chain, url, err.kind(), rt_ms as f64 / 1000.0);
        self.metrics.set_endpoint_weight(&self.chain, url, weight);
        self.metrics
            .set_circuit_breaker_state(&self.chain, url, state.as_metric_value());
    }

    /// Clear weight and breaker state; called on chain shutdown.
    pub async fn clear(&self) {
        self.weights.write().await.clear();
        self.breakers.write().await.clear();
        self.healthy.store(Arc::new(Vec::new()));
        self.archive.store(Arc::new(Vec::new()));
    }

    pub async fn weight_for(&self, url: &str) -> Option<Weight> {
        self.weights.read().await.get(url).cloned()
    }

    pub async fn breaker_state_for(&self, url: &str) -> Option<super::circuit_breaker::CircuitState> {
        self.breakers.read().await.get(url).map(|b| b.state)
    }
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamTimeout("request timed out".to_string())
    } else if e.is_connect() {
        GatewayError::UpstreamTransportError(format!("connect failed: {e}"))
    } else {
        GatewayError::UpstreamTransportError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(url: &str) -> Endpoint {
        Endpoint::new(url.to_string(), "t".to_string())
    }

    fn test_metrics() -> Arc<EndpointMetricsCollector> {
        Arc::new(EndpointMetricsCollector::new(
            crate::services::metrics::MetricsRegistry::new().unwrap(),
        ))
    }

    #[tokio::test]
    async fn route_fails_fast_on_empty_pool() {
        let lb = LoadBalancer::new(
            "c".into(),
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
            test_metrics(),
        );
        let err = lb
            .route(Target::Regular, Forward::Get { request_path: "/status".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoUpstreamsAvailable { .. }));
    }

    #[tokio::test]
    async fn retry_pick_skips_open_breaker() {
        let lb = LoadBalancer::new(
            "c".into(),
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
            test_metrics(),
        );
        let pool = vec![ep("https://a.example"), ep("https://b.example")];
        {
            let mut breakers = lb.breakers.write().await;
            let mut cb = CircuitBreaker::default();
            cb.record_failure(Utc::now());
            cb.record_failure(Utc::now());
            cb.record_failure(Utc::now());
            breakers.insert("https://a.example".to_string(), cb);
        }
        let picked = lb.retry_pick(&pool, 0, 0).await;
        assert_eq!(picked.url, "https://b.example");
    }

    #[tokio::test]
    async fn weighted_pick_degenerates_with_single_endpoint() {
        let lb = LoadBalancer::new(
            "c".into(),
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
            test_metrics(),
        );
        let pool = vec![ep("https://only.example")];
        for _ in 0..10 {
            let picked = lb.weighted_pick(&pool).await;
            assert_eq!(picked.url, "https://only.example");
        }
    }

    #[tokio::test]
    async fn all_open_breakers_fall_through_to_full_pool() {
        let lb = LoadBalancer::new(
            "c".into(),
            3,
            Duration::from_millis(1),
            Duration::from_secs(1),
            test_metrics(),
        );
        let pool = vec![ep("https://a.example"), ep("https://b.example")];
        {
            let mut breakers = lb.breakers.write().await;
            for url in ["https://a.example", "https://b.example"] {
                let mut cb = CircuitBreaker::default();
                cb.record_failure(Utc::now());
                cb.record_failure(Utc::now());
                cb.record_failure(Utc::now());
                breakers.insert(url.to_string(), cb);
            }
        }
        // Should not panic and should return one of the pool members even
        // though every breaker is open.
        let picked = lb.weighted_pick(&pool).await;
        assert!(pool.iter().any(|e| e.url == picked.url));
    }
}
