pub mod collectors;
pub mod middleware;
pub mod registry;

pub use collectors::EndpointMetricsCollector;
pub use middleware::metrics_middleware;
pub use registry::MetricsRegistry;
