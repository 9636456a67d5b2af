use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::endpoint::{normalize_url, Endpoint, RegistrySnapshot};
use super::error::GatewayError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Keys accepted for the RPC address / contributor name fields, in the
/// fallback order spec.md §4.1 lists.
const URL_KEYS: &[&str] = &["RPC Address", "rpc_address", "rpc", "url"];
const NAME_KEYS: &[&str] = &["Team or Contributor Name", "team_name", "team", "name"];

/// Maintains the current set of [`Endpoint`]s for one chain by polling a
/// registry URL. Emits the new snapshot on a `watch` channel iff the set of
/// normalized URLs changed from the previously emitted snapshot — an
/// explicit typed channel rather than a string-keyed event bus, per the
/// Design Notes in spec.md §9.
pub struct RegistryPoller {
    chain: String,
    url: String,
    client: reqwest::Client,
    max_retries: usize,
    interval: Duration,
    tx: watch::Sender<Arc<RegistrySnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl RegistryPoller {
    pub fn new(chain: String, url: String, interval: Duration, max_retries: usize) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(RegistrySnapshot::default()));
        Self {
            chain,
            url,
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            max_retries,
            interval,
            tx,
            task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.tx.borrow().clone()
    }

    /// Perform one poll, retrying with exponential backoff from `1s` up to
    /// `max_retries` times. An empty parsed list counts as a failure so a
    /// populated snapshot is never replaced with nothing.
    pub async fn fetch(&self) -> Result<Vec<Endpoint>, GatewayError> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.fetch_once().await {
                Ok(list) if !list.is_empty() => {
                    self.maybe_emit(&list);
                    return Ok(list);
                }
                Ok(_) => {
                    last_err = Some("registry returned an empty endpoint list".to_string());
                }
                Err(e) => {
                    last_err = Some(e);
                }
            }
            if attempt < self.max_retries {
                let backoff = BASE_BACKOFF * 2u32.pow(attempt as u32);
                tokio::time::sleep(backoff).await;
            }
        }
        Err(GatewayError::RegistryFetchError {
            chain: self.chain.clone(),
            reason: last_err.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    async fn fetch_once(&self) -> Result<Vec<Endpoint>, String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("registry returned HTTP {}", resp.status()));
        }
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        let arr = body
            .as_array()
            .ok_or_else(|| "registry body is not a JSON array".to_string())?;

        let mut out = Vec::with_capacity(arr.len());
        for item in arr {
            let Some(url_raw) = first_str(item, URL_KEYS) else {
                continue;
            };
            let Some(url) = normalize_url(url_raw) else {
                continue;
            };
            let name = first_str(item, NAME_KEYS)
                .unwrap_or("unknown")
                .to_string();
            out.push(Endpoint::new(url, name));
        }
        Ok(out)
    }

    fn maybe_emit(&self, list: &[Endpoint]) {
        let new_snapshot = RegistrySnapshot::new(list.to_vec());
        let changed = {
            let current = self.tx.borrow();
            current.url_set() != new_snapshot.url_set()
        };
        if changed {
            let _ = self.tx.send(Arc::new(new_snapshot));
        }
    }

    /// Run `fetch()` immediately, then on a fixed interval. Periodic
    /// failures are logged and never stop the scheduler or clear the
    /// previously emitted snapshot. Uses a single-shot sleep rescheduled at
    /// the end of each tick, so a slow poll never piles up back-to-back
    /// fetches (spec.md §9 "Timers").
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = this.fetch().await {
                    tracing::error!(chain = %this.chain, error = %e, "registry poll failed");
                }
                tokio::time::sleep(this.interval).await;
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// Force one poll off-schedule; equivalent to an on-schedule tick
    /// occurring at this instant.
    pub async fn force(&self) -> Result<Vec<Endpoint>, GatewayError> {
        self.fetch().await
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| item.get(*k)).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint_urls(list: &[Endpoint]) -> Vec<String> {
        list.iter().map(|e| e.url.clone()).collect()
    }

    #[test]
    fn first_str_uses_fallback_order() {
        let item: Value = serde_json::json!({"rpc_address": "https://b.example"});
        assert_eq!(first_str(&item, URL_KEYS), Some("https://b.example"));
        let item2: Value =
            serde_json::json!({"RPC Address": "https://a.example", "rpc_address": "https://b.example"});
        assert_eq!(first_str(&item2, URL_KEYS), Some("https://a.example"));
    }

    #[tokio::test]
    async fn maybe_emit_is_idempotent_for_identical_body() {
        let poller = RegistryPoller::new(
            "test".into(),
            "https://registry.invalid".into(),
            Duration::from_secs(600),
            0,
        );
        let mut rx = poller.subscribe();
        let list = vec![Endpoint::new("https://a.example".into(), "A".into())];
        poller.maybe_emit(&list);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        // Same membership again: no further emission.
        poller.maybe_emit(&list);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn parses_fixture_array_dropping_malformed_entries() {
        let body = serde_json::json!([
            {"RPC Address": "https://a.example/", "Team or Contributor Name": "T1"},
            {"RPC Address": "not-a-url"},
            {"rpc": "https://b.example"},
        ]);
        let arr = body.as_array().unwrap();
        let mut out = Vec::new();
        for item in arr {
            if let Some(url_raw) = first_str(item, URL_KEYS) {
                if let Some(url) = normalize_url(url_raw) {
                    out.push(url);
                }
            }
        }
        assert_eq!(out, vec!["https://a.example", "https://b.example"]);
        let _ = endpoint_urls(&[]);
    }
}
