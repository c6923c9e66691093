//! In-memory cache with lazy time-to-live expiry
//!
//! Entries are only evicted when a read finds them expired; there is no
//! background sweep and no capacity bound. Callers are expected to use a
//! small, fixed key set.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Default lifetime of an entry
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// A cached value and the time it was stored
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Per-key cache whose entries expire `ttl` after they were set
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value for `key` if it is younger than the TTL
    ///
    /// An expired entry is removed as a side effect.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Same as [`get`](Self::get) but evaluated at `now`
    pub fn get_at(&mut self, key: &K, now: DateTime<Utc>) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => now - entry.stored_at >= self.ttl,
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key`, replacing any previous entry
    pub fn set(&mut self, key: K, value: V) {
        self.set_at(key, value, Utc::now());
    }

    pub fn set_at(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// When `key` was last set, regardless of whether it has expired
    pub fn timestamp(&self, key: &K) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.stored_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
