use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Central metrics registry for the gateway, trimmed to the HTTP and RPC
/// routing concerns this crate actually has — same `prometheus::Registry`
/// wrapper and `register` boilerplate as the teacher's `MetricsRegistry`.
pub struct MetricsRegistry {
    registry: Registry,

    pub http_requests_total: CounterVec,
    pub http_request_duration_seconds: HistogramVec,

    pub rpc_requests_total: CounterVec,
    pub rpc_request_duration_seconds: HistogramVec,
    pub rpc_circuit_breaker_state: GaugeVec,
    pub rpc_endpoint_weight: GaugeVec,
    pub chain_median_height: GaugeVec,
    pub chain_pool_size: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("gateway_http_requests_total", "Total HTTP requests").namespace("gateway"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_http_request_duration_seconds",
                "HTTP request duration",
            )
            .namespace("gateway")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let rpc_requests_total = CounterVec::new(
            Opts::new("gateway_rpc_requests_total", "Total upstream RPC requests")
                .namespace("gateway"),
            &["chain", "endpoint", "status"],
        )?;
        registry.register(Box::new(rpc_requests_total.clone()))?;

        let rpc_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_rpc_request_duration_seconds",
                "Upstream RPC forward duration",
            )
            .namespace("gateway")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["chain", "endpoint"],
        )?;
        registry.register(Box::new(rpc_request_duration_seconds.clone()))?;

        let rpc_circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "gateway_rpc_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            )
            .namespace("gateway"),
            &["chain", "endpoint"],
        )?;
        registry.register(Box::new(rpc_circuit_breaker_state.clone()))?;

        let rpc_endpoint_weight = GaugeVec::new(
            Opts::new("gateway_rpc_endpoint_weight", "Current selection weight")
                .namespace("gateway"),
            &["chain", "endpoint"],
        )?;
        registry.register(Box::new(rpc_endpoint_weight.clone()))?;

        let chain_median_height = GaugeVec::new(
            Opts::new("gateway_chain_median_height", "Median reported block height")
                .namespace("gateway"),
            &["chain"],
        )?;
        registry.register(Box::new(chain_median_height.clone()))?;

        let chain_pool_size = GaugeVec::new(
            Opts::new("gateway_chain_pool_size", "Endpoint count per pool")
                .namespace("gateway"),
            &["chain", "pool"],
        )?;
        registry.register(Box::new(chain_pool_size.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            rpc_requests_total,
            rpc_request_duration_seconds,
            rpc_circuit_breaker_state,
            rpc_endpoint_weight,
            chain_median_height,
            chain_pool_size,
        }))
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_registered_metric_names() {
        let registry = MetricsRegistry::new().unwrap();
        registry
            .http_requests_total
            .with_label_values(&["GET", "/main/status", "200"])
            .inc();
        let text = registry.export().unwrap();
        assert!(text.contains("gateway_http_requests_total"));
    }
}
