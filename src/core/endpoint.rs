use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// A single upstream CometBFT JSON-RPC server, identified by its normalized
/// base URL. Two entries with the same normalized URL are the same
/// endpoint — see [`normalize_url`].
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub name: String,
    pub live: bool,
    pub archive: bool,
    pub height: Option<u64>,
    pub catching_up: bool,
    pub response_time_ms: Option<u64>,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Endpoint {
    pub fn new(url: String, name: String) -> Self {
        Self {
            url,
            name,
            live: false,
            archive: false,
            height: None,
            catching_up: true,
            response_time_ms: None,
            error_count: 0,
            consecutive_failures: 0,
            last_probe: None,
            last_error: None,
        }
    }
}

/// Strip a trailing `/` and require an `http(s)` scheme. Returns `None` for
/// anything else, which callers treat as a malformed registry entry to be
/// silently dropped. Host casing and default ports are intentionally left
/// alone (spec open question — two entries differing only there are
/// distinct endpoints).
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = url::Url::parse(trimmed).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let mut s = trimmed.to_string();
    while s.ends_with('/') {
        s.pop();
    }
    if s.is_empty() {
        return None;
    }
    Some(s)
}

/// An ordered set of [`Endpoint`]s produced by the most recent successful
/// registry poll. Replaces its predecessor atomically via [`crate::core::registry::RegistryPoller`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<Endpoint>,
}

impl RegistrySnapshot {
    pub fn new(entries: Vec<Endpoint>) -> Self {
        // Identity is the normalized URL; first occurrence wins.
        let mut seen = HashSet::new();
        let deduped = entries
            .into_iter()
            .filter(|e| seen.insert(e.url.clone()))
            .collect();
        Self { entries: deduped }
    }

    pub fn entries(&self) -> &[Endpoint] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Set of normalized URLs, for membership-only comparison between
    /// successive snapshots (contributor-name-only changes never count as
    /// a change).
    pub fn url_set(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.url.as_str()).collect()
    }

    pub fn into_entries(self) -> Vec<Endpoint> {
        self.entries
    }
}
