//! Response cache for non-streaming LLM completions.
//!
//! Keyed by the exact message sequence, bounded in size with oldest-entry
//! eviction, and expired by TTL. The cache is an explicitly constructed
//! service: the session manager owns it, starts its periodic sweep at
//! startup, and stops the sweep on shutdown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    text: String,
    inserted_at: Instant,
}

/// Shared LLM response cache.
///
/// Safe for concurrent use by many sessions; the lock is only held for
/// map operations, never across an await.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    enabled: bool,
}

impl ResponseCache {
    /// Create a cache from configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_millis(config.ttl_ms),
            max_entries: config.max_entries.max(1),
            enabled: config.enabled,
        }
    }

    /// Look up a fresh entry. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!("LLM cache hit");
                Some(entry.text.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a response, evicting the oldest entry when full.
    pub fn insert(&self, key: String, text: String) {
        if !self.enabled {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                text,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove all expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Run the periodic expiry sweep until the token is cancelled.
///
/// Spawned by the session manager at startup; cancelling the token is the
/// cache service's teardown.
pub async fn run_sweeper(
    cache: std::sync::Arc<ResponseCache>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "LLM cache sweep");
                }
            }
        }
    }
    info!("LLM cache sweeper stopped");
}
