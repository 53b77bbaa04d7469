//! Shared result cache for atomic arithmetic steps.
//!
//! Keys combine a step's structural signature with its operand values, so the
//! same computation over the same inputs is evaluated once no matter which rule
//! or fact asked for it. Entries expire after the configured TTL.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use trellis_foundation::Value;

use crate::config::ArithmeticCacheConfig;

/// Cache key: step signature plus operand values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultKey {
    /// Structural signature of the step.
    pub signature: String,
    /// Operand values, left to right.
    pub operands: Vec<Value>,
}

impl ResultKey {
    /// Creates a key.
    #[must_use]
    pub fn new(signature: impl Into<String>, operands: Vec<Value>) -> Self {
        Self {
            signature: signature.into(),
            operands,
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    inserted: Instant,
    hits: u64,
}

/// Counters for an [`ArithmeticResultCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResultCacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to compute.
    pub misses: u64,
    /// Entries written.
    pub sets: u64,
    /// Entries dropped for capacity or age.
    pub evictions: u64,
    /// Entries currently held.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl ResultCacheStats {
    /// Fraction of lookups that hit, or 0 when nothing was looked up.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: LruCache<ResultKey, Entry>,
    stats: ResultCacheStats,
    enabled: bool,
}

/// LRU cache of atomic step results, with a TTL.
pub struct ArithmeticResultCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ArithmeticResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArithmeticResultCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ArithmeticResultCache {
    /// Creates a cache from its configuration.
    #[must_use]
    pub fn new(config: &ArithmeticCacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                stats: ResultCacheStats {
                    capacity: cap.get(),
                    ..ResultCacheStats::default()
                },
                enabled: config.enabled,
            }),
        }
    }

    /// Returns true if lookups and writes are active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Turns the cache on or off. Turning it off keeps the entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
    }

    /// Looks up a result. Expired entries are dropped and count as misses.
    pub fn get(&self, key: &ResultKey) -> Option<Value> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }
        let Inner { entries, stats, .. } = &mut *inner;
        let found = match entries.get_mut(key) {
            Some(entry) if entry.inserted.elapsed() > self.ttl => {
                entries.pop(key);
                stats.evictions += 1;
                None
            }
            Some(entry) => {
                entry.hits += 1;
                Some(entry.value.clone())
            }
            None => None,
        };
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Stores a result.
    pub fn put(&self, key: ResultKey, value: Value) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        let Inner { entries, stats, .. } = &mut *inner;
        let entry = Entry {
            value,
            inserted: Instant::now(),
            hits: 0,
        };
        if let Some((old, _)) = entries.push(key.clone(), entry) {
            if old != key {
                stats.evictions += 1;
            }
        }
        stats.sets += 1;
    }

    /// Returns the cached value or computes, stores, and returns it.
    ///
    /// # Errors
    ///
    /// Returns the computation's error; failures are not cached.
    pub fn get_or_compute<E>(
        &self,
        key: ResultKey,
        compute: impl FnOnce() -> Result<Value, E>,
    ) -> Result<(Value, bool), E> {
        if let Some(hit) = self.get(&key) {
            return Ok((hit, true));
        }
        let value = compute()?;
        self.put(key, value.clone());
        Ok((value, false))
    }

    /// Drops expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let Inner { entries, stats, .. } = &mut *inner;
        let expired: Vec<ResultKey> = entries
            .iter()
            .filter(|(_, e)| e.inserted.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        stats.evictions += expired.len() as u64;
        expired.len()
    }

    /// The `n` most-hit entries, most-hit first.
    #[must_use]
    pub fn top_entries(&self, n: usize) -> Vec<(ResultKey, u64)> {
        let inner = self.inner.lock();
        let mut all: Vec<(ResultKey, u64)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.hits))
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.signature.cmp(&b.0.signature)));
        all.truncate(n);
        all
    }

    /// Zeroes the counters, keeping the entries.
    pub fn reset_statistics(&self) {
        let mut inner = self.inner.lock();
        let capacity = inner.stats.capacity;
        inner.stats = ResultCacheStats {
            capacity,
            ..ResultCacheStats::default()
        };
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Returns the number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the counters.
    #[must_use]
    pub fn stats(&self) -> ResultCacheStats {
        let inner = self.inner.lock();
        ResultCacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Fraction of lookups that hit.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        self.stats().hit_rate()
    }
}
