//! Cache key invariants.

use proptest::prelude::*;
use serde_json::json;
use stanchion_cache::default_cache_key;
use stanchion_core::{HttpMethod, RequestSpec};

fn method() -> impl Strategy<Value = HttpMethod> {
    prop_oneof![
        Just(HttpMethod::Get),
        Just(HttpMethod::Post),
        Just(HttpMethod::Put),
        Just(HttpMethod::Patch),
        Just(HttpMethod::Delete),
    ]
}

proptest! {
    /// The key is a stable 64-hex-character digest: equal requests map to
    /// equal keys.
    #[test]
    fn keys_are_stable_hex_digests(
        method in method(),
        host in "[a-z]{3,10}\\.example\\.com",
        path in "/[a-z0-9/]{0,20}",
        param in "[a-z]{1,8}",
        value in 0u32..1000,
    ) {
        let build = || {
            RequestSpec::new(method, host.clone(), path.clone())
                .with_query(param.clone(), value)
        };
        let key_a = default_cache_key(&build());
        let key_b = default_cache_key(&build());

        prop_assert_eq!(&key_a, &key_b);
        prop_assert_eq!(key_a.len(), 64);
        prop_assert!(key_a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Changing any keyed component changes the key.
    #[test]
    fn keyed_components_differentiate(
        host in "[a-z]{3,10}\\.example\\.com",
        path in "/[a-z0-9/]{1,20}",
    ) {
        let base = RequestSpec::get(host.clone(), path.clone());
        let other_method = RequestSpec::post(host.clone(), path.clone());
        let other_query = RequestSpec::get(host.clone(), path.clone()).with_query("q", 1);
        let other_auth = RequestSpec::get(host, path)
            .with_header("authorization", json!("Bearer token"));

        let key = default_cache_key(&base);
        prop_assert_ne!(&key, &default_cache_key(&other_method));
        prop_assert_ne!(&key, &default_cache_key(&other_query));
        prop_assert_ne!(&key, &default_cache_key(&other_auth));
    }

    /// Headers outside the allowlist never affect the key.
    #[test]
    fn unkeyed_headers_are_ignored(
        header in "[a-z][a-z0-9-]{2,12}",
        value in "[a-zA-Z0-9]{1,16}",
    ) {
        prop_assume!(!matches!(
            header.as_str(),
            "accept" | "accept-encoding" | "accept-language" | "authorization"
        ));
        let plain = RequestSpec::get("api.example.com", "/p");
        let with_header = RequestSpec::get("api.example.com", "/p")
            .with_header(header, json!(value));
        prop_assert_eq!(default_cache_key(&plain), default_cache_key(&with_header));
    }
}
