//! Expiring key/value cache with a hard size bound
//!
//! Used by discovery for three independent caches:
//! - positive search results (query -> candidates)
//! - negative search results (query found nothing, shorter TTL)
//! - resolved entities (handle -> candidate, longest TTL)
//!
//! ## Eviction
//!
//! Expired entries are dropped lazily when they are read. When a new key is
//! inserted into a full cache, exactly one entry is evicted first: the one with
//! the smallest expiry. There is no recency or frequency tracking.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// A cached value and the monotonic instant after which it is dead
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<V> {
    default_ttl: Duration,
    max_items: usize,
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration, max_items: usize) -> Self {
        Self {
            default_ttl,
            max_items,
            entries: HashMap::new(),
        }
    }

    /// Returns the live value for `key`, dropping it if it has expired
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at < Instant::now(),
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert `value` under `key` with `ttl` (or the cache default)
    ///
    /// A full cache evicts its soonest-to-expire entry before a new key goes in.
    /// Overwriting an existing key never evicts anything else.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if self.max_items == 0 {
            return;
        }

        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_items {
            self.evict_one();
        }

        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    pub fn has(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet collected
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            log::trace!("cache full, evicting '{}'", key);
            self.entries.remove(&key);
        }
    }
}
