use std::sync::Arc;

use crate::core::MultiChainManager;
use crate::services::metrics::MetricsRegistry;

/// Shared application state, the gateway's counterpart to the teacher's
/// `AppState` (there: db pool, redis client, jwt service; here: the chain
/// manager and the metrics registry).
pub struct AppState {
    pub manager: Arc<MultiChainManager>,
    pub metrics: Arc<MetricsRegistry>,
}
