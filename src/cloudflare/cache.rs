// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Credential cache for validated Cloudflare clients.
//!
//! Token validation costs an API round trip, and busy reconcilers resolve the
//! same secret many times per minute. The cache keys entries by
//! `(secret UID, resourceVersion)` so any mutation of the secret produces a
//! new key and the stale client falls out naturally. Expiry is lazy (checked
//! at get time) with an optional [`CredentialCache::cleanup`] sweep.
//!
//! The cache is process-local and guarded by a single readers-writer lock;
//! the hot path takes the read side only.

use crate::cf_errors::CloudflareError;
use crate::constants::CREDENTIAL_CACHE_TTL_SECS;
use k8s_openapi::api::core::v1::Secret;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::CloudflareApi;

/// Cache of validated clients shared by all reconcilers.
pub type SharedClientCache = Arc<CredentialCache<Arc<dyn CloudflareApi>>>;

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// TTL cache keyed by secret identity and version.
pub struct CredentialCache<T: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    ttl: Duration,
}

/// Build the cache key for a secret. Any change to the secret data bumps
/// `resourceVersion`, which invalidates the old entry.
#[must_use]
pub fn cache_key(secret: &Secret) -> String {
    let uid = secret.metadata.uid.as_deref().unwrap_or_default();
    let version = secret.metadata.resource_version.as_deref().unwrap_or_default();
    format!("{uid}:{version}")
}

impl<T: Clone> Default for CredentialCache<T> {
    fn default() -> Self {
        Self::new(Duration::from_secs(CREDENTIAL_CACHE_TTL_SECS))
    }
}

impl<T: Clone> CredentialCache<T> {
    /// Create a cache with the given entry TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up the cached value for a secret. Expired entries are removed and
    /// reported as a miss.
    pub fn get(&self, secret: &Secret) -> Option<T> {
        let key = cache_key(secret);

        {
            let entries = self.entries.read().expect("credential cache lock poisoned");
            if let Some(entry) = entries.get(&key) {
                if Instant::now() < entry.expires_at {
                    return Some(entry.value.clone());
                }
            } else {
                return None;
            }
        }

        // Entry exists but expired; take the write lock to evict it.
        let mut entries = self.entries.write().expect("credential cache lock poisoned");
        entries.remove(&key);
        None
    }

    /// Store a value for a secret.
    pub fn set(&self, secret: &Secret, value: T) {
        let key = cache_key(secret);
        let mut entries = self.entries.write().expect("credential cache lock poisoned");
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Return the cached value, or build, store and return a fresh one.
    ///
    /// # Errors
    ///
    /// Propagates the builder's error without caching anything.
    pub fn get_or_create<F>(&self, secret: &Secret, build: F) -> Result<T, CloudflareError>
    where
        F: FnOnce() -> Result<T, CloudflareError>,
    {
        if let Some(value) = self.get(secret) {
            return Ok(value);
        }

        let value = build()?;
        self.set(secret, value.clone());
        Ok(value)
    }

    /// Drop the entry for a specific secret.
    pub fn invalidate(&self, secret: &Secret) {
        let key = cache_key(secret);
        let mut entries = self.entries.write().expect("credential cache lock poisoned");
        entries.remove(&key);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("credential cache lock poisoned");
        entries.clear();
    }

    /// Remove expired entries. Called from a background sweep to bound memory
    /// growth between gets.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("credential cache lock poisoned");
        entries.retain(|_, entry| now < entry.expires_at);
    }

    /// Current number of entries, expired or not.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.read().expect("credential cache lock poisoned").len()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
