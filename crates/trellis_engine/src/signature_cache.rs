//! Bounded caches keyed by structural signatures.
//!
//! The network keeps three of these: node signature to node id, beta prefix to
//! join node, and parent/child connections already wired. Each follows its
//! [`CacheSettings`]: LRU caches use [`lru::LruCache`], LFU caches evict the
//! entry with the fewest hits, and `None` caches stop accepting entries once
//! full.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::{CacheSettings, EvictionPolicy};

#[derive(Clone, Debug)]
struct Slot<V> {
    value: V,
    inserted: Instant,
    hits: u64,
}

impl<V> Slot<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted: Instant::now(),
            hits: 0,
        }
    }

    fn expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.inserted.elapsed() > ttl)
    }
}

enum Store<K: Hash + Eq, V> {
    Lru(LruCache<K, Slot<V>>),
    Counted(HashMap<K, Slot<V>>),
}

/// Hit and miss counters for a [`SignatureCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignatureCacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries currently held.
    pub size: usize,
}

struct Inner<K: Hash + Eq, V> {
    store: Store<K, V>,
    stats: SignatureCacheStats,
}

/// A thread-safe cache following one [`CacheSettings`].
pub struct SignatureCache<K: Hash + Eq, V> {
    settings: CacheSettings,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> std::fmt::Debug for SignatureCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureCache")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> SignatureCache<K, V> {
    /// Creates a cache from its settings.
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        let store = match settings.eviction {
            EvictionPolicy::Lru => {
                let cap = NonZeroUsize::new(settings.max_size).unwrap_or(NonZeroUsize::MIN);
                Store::Lru(LruCache::new(cap))
            }
            EvictionPolicy::Lfu | EvictionPolicy::None => Store::Counted(HashMap::new()),
        };
        Self {
            settings,
            inner: Mutex::new(Inner {
                store,
                stats: SignatureCacheStats::default(),
            }),
        }
    }

    /// Returns the settings this cache was built from.
    #[must_use]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Looks up a key. Disabled caches always miss.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.settings.enabled {
            return None;
        }
        let ttl = self.settings.ttl;
        let mut inner = self.inner.lock();
        let Inner { store, stats } = &mut *inner;
        let found = match store {
            Store::Lru(cache) => match cache.get_mut(key) {
                Some(slot) if slot.expired(ttl) => {
                    cache.pop(key);
                    None
                }
                Some(slot) => {
                    slot.hits += 1;
                    Some(slot.value.clone())
                }
                None => None,
            },
            Store::Counted(map) => match map.get_mut(key) {
                Some(slot) if slot.expired(ttl) => {
                    map.remove(key);
                    None
                }
                Some(slot) => {
                    slot.hits += 1;
                    Some(slot.value.clone())
                }
                None => None,
            },
        };
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Inserts or replaces an entry, evicting per the policy when full.
    pub fn put(&self, key: K, value: V) {
        if !self.settings.enabled {
            return;
        }
        let max = self.settings.max_size.max(1);
        let policy = self.settings.eviction;
        let mut inner = self.inner.lock();
        let Inner { store, stats } = &mut *inner;
        match store {
            Store::Lru(cache) => {
                if cache.len() >= max && !cache.contains(&key) {
                    stats.evictions += 1;
                }
                cache.put(key, Slot::new(value));
            }
            Store::Counted(map) => {
                if map.len() >= max && !map.contains_key(&key) {
                    if policy == EvictionPolicy::None {
                        return;
                    }
                    let coldest = map
                        .iter()
                        .min_by_key(|(_, slot)| (slot.hits, slot.inserted))
                        .map(|(k, _)| k.clone());
                    if let Some(coldest) = coldest {
                        map.remove(&coldest);
                        stats.evictions += 1;
                    }
                }
                map.insert(key, Slot::new(value));
            }
        }
    }

    /// Removes an entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match &mut inner.store {
            Store::Lru(cache) => cache.pop(key).map(|s| s.value),
            Store::Counted(map) => map.remove(key).map(|s| s.value),
        }
    }

    /// Removes every entry whose key matches `pred`.
    pub fn remove_where(&self, mut pred: impl FnMut(&K, &V) -> bool) {
        let mut inner = self.inner.lock();
        match &mut inner.store {
            Store::Lru(cache) => {
                let doomed: Vec<K> = cache
                    .iter()
                    .filter(|&(k, s)| pred(k, &s.value))
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in doomed {
                    cache.pop(&k);
                }
            }
            Store::Counted(map) => map.retain(|k, s| !pred(k, &s.value)),
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        match &mut inner.store {
            Store::Lru(cache) => cache.clear(),
            Store::Counted(map) => map.clear(),
        }
    }

    /// Returns the number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        match &inner.store {
            Store::Lru(cache) => cache.len(),
            Store::Counted(map) => map.len(),
        }
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> SignatureCacheStats {
        let inner = self.inner.lock();
        let size = match &inner.store {
            Store::Lru(cache) => cache.len(),
            Store::Counted(map) => map.len(),
        };
        SignatureCacheStats {
            size,
            ..inner.stats
        }
    }
}
