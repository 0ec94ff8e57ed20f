//! HTTP caching header interpretation.

use chrono::{DateTime, Utc};

/// Parsed `Cache-Control` directives relevant to storage decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    /// True when the directives forbid inserting the response.
    pub fn forbids_storage(&self) -> bool {
        self.no_store || self.no_cache
    }
}

/// Parses a `Cache-Control` header value. Unknown directives are ignored.
pub fn parse_cache_control(value: &str) -> CacheControl {
    let mut parsed = CacheControl::default();
    for directive in value.split(',') {
        let directive = directive.trim();
        if directive.eq_ignore_ascii_case("no-store") {
            parsed.no_store = true;
        } else if directive.eq_ignore_ascii_case("no-cache") {
            parsed.no_cache = true;
        } else if let Some(raw) = directive
            .strip_prefix("max-age=")
            .or_else(|| directive.strip_prefix("MAX-AGE="))
        {
            parsed.max_age = raw.trim().parse().ok();
        }
    }
    parsed
}

/// Parses an `Expires` header (RFC 2822 date) into UTC.
pub fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
