use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::config::{ChainConfig, Settings};
use crate::services::metrics::EndpointMetricsCollector;

use super::chain::{ChainInstance, ChainStatus};
use super::error::GatewayError;

#[derive(Debug, Clone, Serialize)]
pub struct AggregateStatus {
    pub chains_total: usize,
    pub chains_ready: usize,
    pub endpoints_total: usize,
    pub endpoints_healthy: usize,
    pub ready: bool,
    pub chains: Vec<ChainStatus>,
}

/// A chain path match: which chain, and whether the archive prefix (vs.
/// the base prefix) was the one that matched.
struct Match<'a> {
    chain: &'a Arc<ChainInstance>,
    is_archive: bool,
    prefix_len: usize,
}

/// Owns one [`ChainInstance`] per configured chain. Routes an incoming
/// path to the instance whose `base_prefix`/`archive_prefix` is the
/// longest matching prefix, and aggregates status across chains
/// (spec.md §4.5).
pub struct MultiChainManager {
    chains: HashMap<String, Arc<ChainInstance>>,
}

impl MultiChainManager {
    pub fn new(
        configs: Vec<ChainConfig>,
        settings: &Settings,
        metrics: Arc<EndpointMetricsCollector>,
    ) -> Self {
        let chains = configs
            .into_iter()
            .map(|c| (c.name.clone(), ChainInstance::new(c, settings, Arc::clone(&metrics))))
            .collect();
        Self { chains }
    }

    /// All chains initialize in parallel; fails iff any single instance
    /// fails to initialize.
    pub async fn initialize_all(&self) -> Result<(), GatewayError> {
        let mut set = JoinSet::new();
        for chain in self.chains.values() {
            let chain = Arc::clone(chain);
            set.spawn(async move { chain.initialize().await });
        }
        let mut first_err = None;
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "chain initialization task panicked");
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Parallel, best-effort: one chain's cleanup failure never blocks
    /// another's.
    pub async fn shutdown_all(&self) {
        let mut set = JoinSet::new();
        for chain in self.chains.values() {
            let chain = Arc::clone(chain);
            set.spawn(async move { chain.shutdown().await });
        }
        while set.join_next().await.is_some() {}
    }

    fn find_match(&self, path: &str) -> Option<Match<'_>> {
        self.chains
            .values()
            .filter_map(|chain| {
                let cfg = chain.config();
                if path.starts_with(&cfg.archive_prefix) {
                    Some(Match {
                        chain,
                        is_archive: true,
                        prefix_len: cfg.archive_prefix.len(),
                    })
                } else if path.starts_with(&cfg.base_prefix) {
                    Some(Match {
                        chain,
                        is_archive: false,
                        prefix_len: cfg.base_prefix.len(),
                    })
                } else {
                    None
                }
            })
            .max_by_key(|m| m.prefix_len)
    }

    /// Resolve an inbound path to `(chain, is_archive, remainder)`, where
    /// `remainder` is everything after the matched prefix (the RPC method
    /// path plus query string).
    pub fn resolve(&self, path: &str) -> Result<(Arc<ChainInstance>, bool, String), GatewayError> {
        match self.find_match(path) {
            Some(m) => Ok((
                Arc::clone(m.chain),
                m.is_archive,
                path[m.prefix_len..].to_string(),
            )),
            None => Err(GatewayError::ChainNotFound {
                path: path.to_string(),
            }),
        }
    }

    pub fn chain(&self, key: &str) -> Option<Arc<ChainInstance>> {
        self.chains.get(key).cloned()
    }

    pub async fn aggregate_status(&self) -> AggregateStatus {
        let mut statuses = Vec::with_capacity(self.chains.len());
        for chain in self.chains.values() {
            statuses.push(chain.status().await);
        }
        let chains_ready = statuses.iter().filter(|s| s.healthy_count > 0).count();
        let endpoints_total: usize = statuses.iter().map(|s| s.all_count).sum();
        let endpoints_healthy: usize = statuses.iter().map(|s| s.healthy_count).sum();
        AggregateStatus {
            chains_total: statuses.len(),
            chains_ready,
            endpoints_total,
            endpoints_healthy,
            ready: !statuses.is_empty() && chains_ready == statuses.len(),
            chains: statuses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, base: &str, archive: &str) -> ChainConfig {
        ChainConfig {
            name: name.into(),
            display_name: name.into(),
            registry_url: "https://registry.invalid".into(),
            base_prefix: base.into(),
            archive_prefix: archive.into(),
        }
    }

    fn test_metrics() -> Arc<EndpointMetricsCollector> {
        Arc::new(EndpointMetricsCollector::new(
            crate::services::metrics::MetricsRegistry::new().unwrap(),
        ))
    }

    #[test]
    fn longer_archive_prefix_wins_over_base() {
        let settings = Settings::default();
        let manager = MultiChainManager::new(
            vec![cfg("main", "/main", "/main/archive")],
            &settings,
            test_metrics(),
        );
        let (chain, is_archive, rest) = manager.resolve("/main/archive/block?height=1").unwrap();
        assert_eq!(chain.key, "main");
        assert!(is_archive);
        assert_eq!(rest, "/block?height=1");

        let (chain2, is_archive2, rest2) = manager.resolve("/main/status").unwrap();
        assert_eq!(chain2.key, "main");
        assert!(!is_archive2);
        assert_eq!(rest2, "/status");
    }

    #[test]
    fn unmatched_path_is_chain_not_found() {
        let settings = Settings::default();
        let manager = MultiChainManager::new(
            vec![cfg("main", "/main", "/main/archive")],
            &settings,
            test_metrics(),
        );
        assert!(matches!(
            manager.resolve("/other/status"),
            Err(GatewayError::ChainNotFound { .. })
        ));
    }
}
