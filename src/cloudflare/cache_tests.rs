// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cache.rs`

use super::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn make_secret(uid: &str, version: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("cloudflare-credentials".to_string()),
            namespace: Some("default".to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some(version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_cache_key_includes_uid_and_version() {
    let secret = make_secret("abc", "100");
    assert_eq!(cache_key(&secret), "abc:100");
}

#[test]
fn test_get_miss_then_hit() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_secs(60));
    let secret = make_secret("abc", "100");

    assert!(cache.get(&secret).is_none());

    cache.set(&secret, "client-1".to_string());
    assert_eq!(cache.get(&secret).as_deref(), Some("client-1"));
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_secret_mutation_invalidates() {
    // A new resourceVersion produces a new key; the old entry is unreachable.
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_secs(60));
    let v100 = make_secret("abc", "100");
    let v101 = make_secret("abc", "101");

    cache.set(&v100, "client-1".to_string());
    assert!(cache.get(&v101).is_none());
}

#[test]
fn test_expired_entry_is_a_miss() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_millis(0));
    let secret = make_secret("abc", "100");

    cache.set(&secret, "client-1".to_string());
    std::thread::sleep(Duration::from_millis(5));
    assert!(cache.get(&secret).is_none());
    // The expired entry was evicted by the failed get.
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_get_or_create_builds_once() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_secs(60));
    let secret = make_secret("abc", "100");

    let mut builds = 0;
    let value = cache
        .get_or_create(&secret, || {
            builds += 1;
            Ok("client-1".to_string())
        })
        .unwrap();
    assert_eq!(value, "client-1");

    let value = cache
        .get_or_create(&secret, || {
            builds += 1;
            Ok("client-2".to_string())
        })
        .unwrap();
    assert_eq!(value, "client-1");
    assert_eq!(builds, 1);
}

#[test]
fn test_get_or_create_error_is_not_cached() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_secs(60));
    let secret = make_secret("abc", "100");

    let result = cache.get_or_create(&secret, || {
        Err(crate::cf_errors::CloudflareError::InvalidCredentials {
            reason: "bad token".to_string(),
        })
    });
    assert!(result.is_err());
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_invalidate_and_clear() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_secs(60));
    let a = make_secret("a", "1");
    let b = make_secret("b", "1");

    cache.set(&a, "client-a".to_string());
    cache.set(&b, "client-b".to_string());
    assert_eq!(cache.size(), 2);

    cache.invalidate(&a);
    assert!(cache.get(&a).is_none());
    assert_eq!(cache.get(&b).as_deref(), Some("client-b"));

    cache.clear();
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_cleanup_sweeps_expired_entries() {
    let cache: CredentialCache<String> = CredentialCache::new(Duration::from_millis(0));
    let a = make_secret("a", "1");
    let b = make_secret("b", "1");

    cache.set(&a, "client-a".to_string());
    cache.set(&b, "client-b".to_string());
    std::thread::sleep(Duration::from_millis(5));

    cache.cleanup();
    assert_eq!(cache.size(), 0);
}
