use serde::{Deserialize, Serialize};

/// Gateway-wide tunables (spec.md §6 "Configuration"). Defaults match the
/// spec; each can be overridden by an environment variable, the way the
/// teacher's `RpcEndpoint`/`CircuitBreakerConfig` fields carry
/// `#[serde(default = "...")]` functions and `load_rpc_config` layers
/// `std::env::var(...).unwrap_or(default)` on top of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_registry_update_interval_ms")]
    pub registry_update_interval_ms: u64,
    #[serde(default = "default_sync_threshold_blocks")]
    pub sync_threshold_blocks: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_registry_max_retries")]
    pub registry_max_retries: usize,
}

fn default_port() -> u16 {
    8080
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_registry_update_interval_ms() -> u64 {
    600_000
}
fn default_sync_threshold_blocks() -> u64 {
    50
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_health_check_timeout_ms() -> u64 {
    5_000
}
fn default_retry_attempts() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_registry_max_retries() -> usize {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            health_check_interval_ms: default_health_check_interval_ms(),
            registry_update_interval_ms: default_registry_update_interval_ms(),
            sync_threshold_blocks: default_sync_threshold_blocks(),
            request_timeout_ms: default_request_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            registry_max_retries: default_registry_max_retries(),
        }
    }
}

impl Settings {
    /// Layer environment-variable overrides on top of file/defaults,
    /// clamping `registry_update_interval_ms` to its spec'd 60s floor.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("HEALTH_CHECK_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.health_check_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("REGISTRY_UPDATE_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.registry_update_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SYNC_THRESHOLD_BLOCKS") {
            if let Ok(n) = v.parse() {
                self.sync_threshold_blocks = n;
            }
        }
        if let Ok(v) = std::env::var("REQUEST_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.request_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HEALTH_CHECK_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.health_check_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("RETRY_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.retry_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("RETRY_DELAY_MS") {
            if let Ok(n) = v.parse() {
                self.retry_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(n) = v.parse() {
                self.port = n;
            }
        }
        self.registry_update_interval_ms = self.registry_update_interval_ms.max(60_000);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_interval_floor_is_enforced() {
        std::env::set_var("REGISTRY_UPDATE_INTERVAL_MS", "1000");
        let s = Settings::default().apply_env_overrides();
        assert_eq!(s.registry_update_interval_ms, 60_000);
        std::env::remove_var("REGISTRY_UPDATE_INTERVAL_MS");
    }
}
