// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache of verified tokens.
//!
//! Gateways call the check endpoint for every request, usually with the
//! same token many times in a row. Entries are keyed by the SHA-256 of the
//! token so raw credentials are never held in memory longer than the
//! request.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::Identity;

/// Cached entry: identity + the last Unix second it may be served.
struct CacheEntry {
    identity: Identity,
    valid_until: i64,
    inserted_at: Instant,
}

/// In-process LRU cache for verified identities.
pub struct TokenCache {
    cache: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl TokenCache {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of tokens to remember.
    /// - `ttl`: Upper bound on how long an entry is served, independent of
    ///   token expiry. Keeps key revocation in the JWKS effective.
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn key(token: &str) -> [u8; 32] {
        let digest = Sha256::digest(token.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        key
    }

    /// Get the identity for a previously verified token.
    ///
    /// Returns `None` if not cached, past its TTL, or if `now` (Unix
    /// seconds) is beyond the token's validity.
    pub fn get(&self, token: &str, now: i64) -> Option<Identity> {
        let key = Self::key(token);
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl && now <= entry.valid_until {
                return Some(entry.identity.clone());
            }
            // Expired — remove it
            cache.pop(&key);
        }
        None
    }

    /// Remember a verified token until `valid_until` (Unix seconds).
    pub fn insert(&self, token: &str, identity: Identity, valid_until: i64) {
        let key = Self::key(token);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    identity,
                    valid_until,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Number of cached entries (including ones not yet evicted after expiry).
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
