use std::sync::Arc;
use std::time::Instant;

use super::MetricsRegistry;

/// Records upstream RPC routing outcomes and pool-state gauges for a chain.
/// Mirrors the teacher's per-domain collector split (one struct per concern
/// wrapping a shared `MetricsRegistry`), trimmed to the endpoint/chain
/// concerns this gateway actually has.
pub struct EndpointMetricsCollector {
    metrics: Arc<MetricsRegistry>,
}

impl EndpointMetricsCollector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    pub fn record_rpc_request(&self, chain: &str, endpoint: &str, status: &str, duration_secs: f64) {
        self.metrics
            .rpc_requests_total
            .with_label_values(&[chain, endpoint, status])
            .inc();

        self.metrics
            .rpc_request_duration_seconds
            .with_label_values(&[chain, endpoint])
            .observe(duration_secs);
    }

    pub fn set_circuit_breaker_state(&self, chain: &str, endpoint: &str, state: f64) {
        self.metrics
            .rpc_circuit_breaker_state
            .with_label_values(&[chain, endpoint])
            .set(state);
    }

    pub fn set_endpoint_weight(&self, chain: &str, endpoint: &str, weight: f64) {
        self.metrics
            .rpc_endpoint_weight
            .with_label_values(&[chain, endpoint])
            .set(weight);
    }

    pub fn set_median_height(&self, chain: &str, height: u64) {
        self.metrics
            .chain_median_height
            .with_label_values(&[chain])
            .set(height as f64);
    }

    pub fn set_pool_size(&self, chain: &str, pool: &str, size: usize) {
        self.metrics
            .chain_pool_size
            .with_label_values(&[chain, pool])
            .set(size as f64);
    }
}

/// Timer helper for measuring durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for MetricsTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rpc_request_updates_counter_and_histogram() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = EndpointMetricsCollector::new(registry.clone());
        collector.record_rpc_request("main", "https://a.example", "200", 0.05);
        collector.set_circuit_breaker_state("main", "https://a.example", 0.0);
        collector.set_median_height("main", 1000);
        collector.set_pool_size("main", "healthy", 3);
        let text = registry.export().unwrap();
        assert!(text.contains("gateway_rpc_requests_total"));
        assert!(text.contains("gateway_chain_median_height"));
    }
}
