//! TTL + LRU response cache that respects HTTP cache-control.
//!
//! Entries are keyed by a stable digest of the request (see [`key`]) and
//! carry an absolute expiry. `get` treats expired entries as absent and
//! removes them lazily; `prune` sweeps eagerly. When the cache is full, the
//! least recently used entry is evicted on insert. Storage decisions honor
//! `Cache-Control: no-store|no-cache`, `max-age` and `Expires`.

mod config;
mod control;
pub mod key;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use control::{parse_cache_control, parse_expires, CacheControl};
pub use key::{default_cache_key, CacheKeyer};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use stanchion_core::{RequestSpec, TransportResponse};
use std::collections::HashMap;
use std::sync::Mutex;

/// One cached response.
#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub data: serde_json::Value,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    /// True when the entry has outlived its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Counter snapshot for a response cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

struct Slot {
    response: CachedResponse,
    last_used: u64,
}

struct Store {
    entries: HashMap<String, Slot>,
    clock: u64,
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
    expired_removals: u64,
}

/// TTL + LRU response cache.
pub struct ResponseCache {
    config: CacheConfig,
    store: Mutex<Store>,
}

impl ResponseCache {
    /// Creates a cache from its configuration; see [`CacheConfig::builder`].
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            store: Mutex::new(Store {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                inserts: 0,
                evictions: 0,
                expired_removals: 0,
            }),
        }
    }

    /// A cache with default settings.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::builder().build_config())
    }

    fn key_for(&self, spec: &RequestSpec) -> String {
        match &self.config.keyer {
            Some(keyer) => keyer(spec),
            None => default_cache_key(spec),
        }
    }

    /// Looks up a fresh entry, updating recency on hit. Expired entries are
    /// removed and reported as misses.
    pub fn get(&self, spec: &RequestSpec) -> Option<CachedResponse> {
        let key = self.key_for(spec);
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();
        store.clock += 1;
        let tick = store.clock;

        let hit = match store.entries.get_mut(&key) {
            Some(slot) if !slot.response.is_expired(now) => {
                slot.last_used = tick;
                Some(slot.response.clone())
            }
            Some(_) => {
                store.entries.remove(&key);
                store.expired_removals += 1;
                None
            }
            None => None,
        };

        if hit.is_some() {
            store.hits += 1;
            #[cfg(feature = "metrics")]
            metrics::counter!("cache_hits_total", "cache" => self.config.name.clone()).increment(1);
        } else {
            store.misses += 1;
            #[cfg(feature = "metrics")]
            metrics::counter!("cache_misses_total", "cache" => self.config.name.clone())
                .increment(1);
        }
        hit
    }

    /// Stores a response if the request method, status, and cache-control
    /// directives allow it. Returns whether an entry was inserted.
    pub fn set(&self, spec: &RequestSpec, response: &TransportResponse) -> bool {
        if self.config.excluded_methods.contains(&spec.method) {
            return false;
        }
        if !self.config.cacheable_status_codes.contains(&response.status) {
            return false;
        }

        let cache_control = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
            .map(|(_, value)| parse_cache_control(value))
            .unwrap_or_default();
        if cache_control.forbids_storage() {
            return false;
        }

        let now = Utc::now();
        let expires_at = if let Some(max_age) = cache_control.max_age {
            now + ChronoDuration::seconds(max_age as i64)
        } else if let Some(expires) = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("expires"))
            .and_then(|(_, value)| parse_expires(value))
        {
            expires
        } else {
            now + ChronoDuration::from_std(self.config.default_ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(60))
        };

        let entry = CachedResponse {
            data: response.body.clone(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            stored_at: now,
            expires_at,
        };

        let key = self.key_for(spec);
        let mut store = self.store.lock().unwrap();
        store.clock += 1;
        let tick = store.clock;
        store.entries.insert(
            key,
            Slot {
                response: entry,
                last_used: tick,
            },
        );
        store.inserts += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("cache_inserts_total", "cache" => self.config.name.clone()).increment(1);

        // Evict least recently used entries until back under capacity.
        while store.entries.len() > self.config.max_size {
            let lru_key = store
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            match lru_key {
                Some(key) => {
                    store.entries.remove(&key);
                    store.evictions += 1;
                    #[cfg(feature = "metrics")]
                    metrics::counter!("cache_evictions_total", "cache" => self.config.name.clone())
                        .increment(1);
                }
                None => break,
            }
        }
        true
    }

    /// Eagerly removes every expired entry.
    pub fn prune(&self) {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();
        let before = store.entries.len();
        store.entries.retain(|_, slot| !slot.response.is_expired(now));
        let removed = before - store.entries.len();
        store.expired_removals += removed as u64;
    }

    /// Removes everything.
    pub fn clear(&self) {
        self.store.lock().unwrap().entries.clear();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        let store = self.store.lock().unwrap();
        CacheMetrics {
            size: store.entries.len(),
            max_size: self.config.max_size,
            hits: store.hits,
            misses: store.misses,
            inserts: store.inserts,
            evictions: store.evictions,
            expired_removals: store.expired_removals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn cache(max_size: usize, ttl: Duration) -> ResponseCache {
        CacheConfig::builder()
            .max_size(max_size)
            .default_ttl(ttl)
            .build()
    }

    fn ok_response(body: serde_json::Value) -> TransportResponse {
        TransportResponse::new(200, body)
    }

    #[test]
    fn round_trip() {
        let cache = cache(10, Duration::from_secs(60));
        let spec = RequestSpec::get("api.example.com", "/a");
        assert!(cache.get(&spec).is_none());

        assert!(cache.set(&spec, &ok_response(json!({"v": 1}))));
        let hit = cache.get(&spec).unwrap();
        assert_eq!(hit.data, json!({"v": 1}));
        assert_eq!(hit.status, 200);

        let snapshot = cache.metrics();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = cache(10, Duration::from_millis(20));
        let spec = RequestSpec::get("api.example.com", "/a");
        cache.set(&spec, &ok_response(json!(1)));

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&spec).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn no_store_and_no_cache_forbid_insertion() {
        let cache = cache(10, Duration::from_secs(60));
        let spec = RequestSpec::get("api.example.com", "/a");

        let resp = ok_response(json!(1)).with_header("Cache-Control", "no-store");
        assert!(!cache.set(&spec, &resp));

        let resp = ok_response(json!(1)).with_header("Cache-Control", "no-cache");
        assert!(!cache.set(&spec, &resp));
        assert!(cache.is_empty());
    }

    #[test]
    fn max_age_overrides_default_ttl() {
        let cache = cache(10, Duration::from_secs(3600));
        let spec = RequestSpec::get("api.example.com", "/a");
        let resp = ok_response(json!(1)).with_header("Cache-Control", "max-age=1");
        cache.set(&spec, &resp);

        let entry = cache.get(&spec).unwrap();
        let ttl = entry.expires_at - entry.stored_at;
        assert!(ttl <= ChronoDuration::seconds(2));
    }

    #[test]
    fn excluded_methods_are_not_cached() {
        let cache = cache(10, Duration::from_secs(60));
        let spec = RequestSpec::post("api.example.com", "/a");
        assert!(!cache.set(&spec, &ok_response(json!(1))));
    }

    #[test]
    fn uncacheable_status_is_not_cached() {
        let cache = cache(10, Duration::from_secs(60));
        let spec = RequestSpec::get("api.example.com", "/a");
        assert!(!cache.set(&spec, &TransportResponse::new(204, json!(null))));
    }

    #[test]
    fn lru_eviction_on_overflow() {
        let cache = cache(2, Duration::from_secs(60));
        let a = RequestSpec::get("api.example.com", "/a");
        let b = RequestSpec::get("api.example.com", "/b");
        let c = RequestSpec::get("api.example.com", "/c");

        cache.set(&a, &ok_response(json!("a")));
        cache.set(&b, &ok_response(json!("b")));
        // Touch /a so /b becomes the LRU entry.
        cache.get(&a);
        cache.set(&c, &ok_response(json!("c")));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn prune_sweeps_expired_entries() {
        let cache = cache(10, Duration::from_millis(10));
        for i in 0..3 {
            let spec = RequestSpec::get("api.example.com", format!("/{i}"));
            cache.set(&spec, &ok_response(json!(i)));
        }
        std::thread::sleep(Duration::from_millis(20));
        cache.prune();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.metrics().expired_removals, 3);
    }

    #[test]
    fn custom_keyer_is_used() {
        let cache = CacheConfig::builder()
            .keyer(|spec: &RequestSpec| spec.path.clone())
            .build();
        let a = RequestSpec::get("one.example.com", "/same");
        let b = RequestSpec::get("two.example.com", "/same");
        cache.set(&a, &ok_response(json!("shared")));
        assert_eq!(cache.get(&b).unwrap().data, json!("shared"));
    }
}
