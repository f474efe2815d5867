use crate::fingerprint::Fingerprint;
use crate::result::BrowseResult;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseCacheConfig {
    /// Maximum cached results (default: 1000).
    pub max_entries: usize,
    /// Time-to-live per entry in seconds (default: 24h).
    pub ttl_secs: u64,
    /// `source::column` pairs (e.g. `entity::attribute`, `query::column`) that are never cached.
    pub exclusions: Vec<String>,
    /// Disable caching entirely.
    pub disabled: bool,
}

impl Default for BrowseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 24 * 60 * 60,
            exclusions: Vec::new(),
            disabled: false,
        }
    }
}

impl BrowseCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BrowseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub clears: u64,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub result: Arc<BrowseResult>,
    pub inserted_at: Instant,
}

/// Notification from the catalog layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogEvent {
    /// Source definitions or connections were reloaded.
    Refreshed,
}

/// Channel the catalog layer publishes [`CatalogEvent`]s on.
pub fn refresh_channel(capacity: usize) -> (broadcast::Sender<CatalogEvent>, broadcast::Receiver<CatalogEvent>) {
    broadcast::channel(capacity.max(1))
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    stats: BrowseCacheStats,
}

/// Bounded, time-expiring cache of browse results.
///
/// Eviction is by insertion order: lookups use `peek`, so reading an entry never refreshes its
/// position. The exclusion list and the disabled switch are fixed at construction.
pub struct BrowseValueCache {
    config: BrowseCacheConfig,
    ttl: Duration,
    exclusions: HashSet<(String, String)>,
    inner: Mutex<Inner>,
}

impl BrowseValueCache {
    pub fn new(mut config: BrowseCacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        let exclusions = parse_exclusions(&config.exclusions);
        let cap = NonZeroUsize::new(config.max_entries).expect("max_entries is non-zero");
        Self {
            ttl: config.ttl(),
            config,
            exclusions,
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                stats: BrowseCacheStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &BrowseCacheConfig {
        &self.config
    }

    pub fn is_disabled(&self) -> bool {
        self.config.disabled
    }

    pub fn is_excluded(&self, source: &str, column: &str) -> bool {
        self.exclusions
            .contains(&(source.to_ascii_lowercase(), column.to_ascii_lowercase()))
    }

    fn bypass(&self, fingerprint: &Fingerprint) -> bool {
        self.config.disabled || self.is_excluded(fingerprint.source(), fingerprint.column())
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        if self.bypass(fingerprint) {
            return None;
        }

        let mut inner = self.inner.lock().expect("browse cache mutex poisoned");
        let found = inner
            .entries
            .peek(fingerprint.as_str())
            .map(|entry| (entry.inserted_at.elapsed() <= self.ttl).then(|| entry.clone()));
        match found {
            Some(Some(entry)) => {
                inner.stats.hits += 1;
                return Some(entry);
            }
            Some(None) => {
                inner.entries.pop(fingerprint.as_str());
                inner.stats.expirations += 1;
            }
            None => {}
        }
        inner.stats.misses += 1;
        None
    }

    /// Cache `result`. Returns `false` when caching is disabled or the column is excluded.
    pub fn store(&self, fingerprint: &Fingerprint, result: Arc<BrowseResult>) -> bool {
        if self.bypass(fingerprint) {
            return false;
        }

        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            result,
            inserted_at: Instant::now(),
        };
        let mut inner = self.inner.lock().expect("browse cache mutex poisoned");
        // Re-storing a key must count as a fresh insertion, so drop the old slot first.
        inner.entries.pop(fingerprint.as_str());
        if let Some((evicted, _)) = inner.entries.push(fingerprint.as_str().to_string(), entry) {
            inner.stats.evictions += 1;
            log::debug!("browse cache evicted {}", evicted.replace('\u{1f}', " | "));
        }
        inner.stats.stores += 1;
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("browse cache mutex poisoned");
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.stats.clears += 1;
        log::debug!("browse cache cleared ({dropped} entries)");
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("browse cache mutex poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BrowseCacheStats {
        self.inner.lock().expect("browse cache mutex poisoned").stats
    }

    pub fn on_catalog_event(&self, event: CatalogEvent) {
        match event {
            CatalogEvent::Refreshed => self.clear(),
        }
    }

    /// Clear the cache whenever the catalog refreshes. Missed (lagged) events also clear it.
    /// The task ends when every sender is dropped.
    pub fn spawn_refresh_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<CatalogEvent>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => cache.on_catalog_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::debug!("browse cache missed {missed} catalog events; clearing");
                        cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn parse_exclusions(raw: &[String]) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    for item in raw {
        match item.split_once("::") {
            Some((source, column)) if !source.trim().is_empty() && !column.trim().is_empty() => {
                out.insert((
                    source.trim().to_ascii_lowercase(),
                    column.trim().to_ascii_lowercase(),
                ));
            }
            _ => log::warn!("ignoring malformed browse cache exclusion `{item}`"),
        }
    }
    out
}
