//! Stable cache key derivation.
//!
//! The default key is a SHA-256 hex digest of
//! `METHOD|URL|JSON(params)|"h:k1=v1|k2=v2|…"` over a canonical allowlist of
//! headers in a fixed order, so the same logical request always maps to the
//! same entry regardless of header map iteration order.

use sha2::{Digest, Sha256};
use stanchion_core::RequestSpec;
use std::sync::Arc;

/// Headers that participate in the key, in this exact order.
const KEYED_HEADERS: [&str; 4] = [
    "accept",
    "accept-encoding",
    "accept-language",
    "authorization",
];

/// Caller-supplied key function overriding [`default_cache_key`].
pub type CacheKeyer = Arc<dyn Fn(&RequestSpec) -> String + Send + Sync>;

/// Computes the default stable key for a request.
pub fn default_cache_key(spec: &RequestSpec) -> String {
    // serde_json::Map is ordered by key, so serializing the query map yields
    // the sorted-params canonical form.
    let params = serde_json::to_string(&spec.query).unwrap_or_default();

    let mut header_part = String::from("h:");
    let mut first = true;
    for name in KEYED_HEADERS {
        let value = spec.headers.iter().find_map(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                Some(v)
            } else {
                None
            }
        });
        if let Some(value) = value {
            if !first {
                header_part.push('|');
            }
            let rendered = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            header_part.push_str(&format!("{name}={rendered}"));
            first = false;
        }
    }

    let composed = format!(
        "{}|{}|{}|{}",
        spec.method,
        spec.full_url(),
        params,
        header_part
    );
    let digest = Sha256::digest(composed.as_bytes());
    hex::encode(digest)
}
