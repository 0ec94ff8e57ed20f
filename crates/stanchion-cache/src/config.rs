//! Response cache configuration.

use crate::key::CacheKeyer;
use stanchion_core::{HttpMethod, RequestSpec};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`crate::ResponseCache`].
pub struct CacheConfig {
    pub(crate) max_size: usize,
    pub(crate) default_ttl: Duration,
    pub(crate) cacheable_status_codes: Vec<u16>,
    pub(crate) excluded_methods: Vec<HttpMethod>,
    pub(crate) keyer: Option<CacheKeyer>,
    pub(crate) name: String,
}

impl CacheConfig {
    /// Creates a configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    max_size: usize,
    default_ttl: Duration,
    cacheable_status_codes: Vec<u16>,
    excluded_methods: Vec<HttpMethod>,
    keyer: Option<CacheKeyer>,
    name: String,
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults: 100 entries, 60s TTL, statuses `[200, 203, 300, 301, 308]`,
    /// only GET responses cached.
    pub fn new() -> Self {
        Self {
            max_size: 100,
            default_ttl: Duration::from_secs(60),
            cacheable_status_codes: vec![200, 203, 300, 301, 308],
            excluded_methods: vec![
                HttpMethod::Post,
                HttpMethod::Put,
                HttpMethod::Patch,
                HttpMethod::Delete,
            ],
            keyer: None,
            name: "<unnamed>".to_string(),
        }
    }

    /// Maximum entries before LRU eviction.
    ///
    /// Default: 100
    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n.max(1);
        self
    }

    /// TTL applied when the response carries no `max-age`/`Expires`.
    ///
    /// Default: 60 seconds
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Statuses eligible for caching.
    pub fn cacheable_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.cacheable_status_codes = codes.into();
        self
    }

    /// Methods whose responses are never cached.
    pub fn excluded_methods(mut self, methods: impl Into<Vec<HttpMethod>>) -> Self {
        self.excluded_methods = methods.into();
        self
    }

    /// Overrides the stable-hash key with a caller-supplied function.
    pub fn keyer<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestSpec) -> String + Send + Sync + 'static,
    {
        self.keyer = Some(Arc::new(f));
        self
    }

    /// Human-readable name used in logs and metric labels.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Finishes the configuration.
    pub fn build_config(self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            cacheable_status_codes: self.cacheable_status_codes,
            excluded_methods: self.excluded_methods,
            keyer: self.keyer,
            name: self.name,
        }
    }

    /// Builds the cache directly.
    pub fn build(self) -> crate::ResponseCache {
        crate::ResponseCache::new(self.build_config())
    }
}
