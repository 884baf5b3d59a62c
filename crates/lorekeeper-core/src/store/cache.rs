//! Byte-bounded read cache in front of the structured store.
//!
//! Eviction scoring is pluggable so pure LRU or LFU can replace the default
//! hit-rate/age heuristic without touching the store.

use std::collections::HashMap;

use crate::util::unix_millis_now;

/// Bookkeeping the eviction policy scores entries by.
#[derive(Debug, Clone, Copy)]
pub struct CacheEntryMeta {
    /// Read hits since insertion
    pub hits: u64,
    /// Insertion time, Unix ms
    pub inserted_at: i64,
    /// Last access time, Unix ms
    pub last_access: i64,
    /// Serialized entry size in bytes
    pub size: usize,
}

/// Scores cache entries; the lowest score is evicted first.
pub trait EvictionPolicy: Send + Sync {
    /// Score an entry at the given time.
    fn score(&self, meta: &CacheEntryMeta, now_millis: i64) -> f64;
}

/// Default heuristic: hit count divided by entry age. Entries read often and
/// recently inserted survive; stale one-hit entries go first.
#[derive(Debug, Clone, Copy, Default)]
pub struct HitRateAged;

impl EvictionPolicy for HitRateAged {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, meta: &CacheEntryMeta, now_millis: i64) -> f64 {
        let age_millis = (now_millis - meta.inserted_at).max(1) as f64;
        (meta.hits as f64 + 1.0) / age_millis
    }
}

/// Pure least-recently-used scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lru;

impl EvictionPolicy for Lru {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, meta: &CacheEntryMeta, _now_millis: i64) -> f64 {
        meta.last_access as f64
    }
}

/// Cache counters exposed through the diagnostics export.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

struct CacheEntry {
    value: String,
    meta: CacheEntryMeta,
}

/// Read cache keyed by (store, id). Mutated only by the structured store that
/// owns it.
pub struct ReadCache {
    entries: HashMap<(String, String), CacheEntry>,
    policy: Box<dyn EvictionPolicy>,
    max_bytes: usize,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ReadCache {
    /// Create a cache with the default hit-rate/age policy.
    pub fn new(max_bytes: usize) -> Self {
        Self::with_policy(max_bytes, Box::new(HitRateAged))
    }

    /// Create a cache with an explicit eviction policy.
    pub fn with_policy(max_bytes: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
            max_bytes,
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up an entry, bumping hit counters on success.
    pub fn get(&mut self, store: &str, id: &str) -> Option<String> {
        let key = (store.to_string(), id.to_string());
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.meta.hits += 1;
                entry.meta.last_access = unix_millis_now();
                self.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or replace an entry, evicting as needed to stay in budget.
    ///
    /// Values larger than the whole budget are not cached at all.
    pub fn insert(&mut self, store: &str, id: &str, value: String) {
        let size = value.len();
        if size > self.max_bytes {
            return;
        }
        self.remove(store, id);

        let now = unix_millis_now();
        self.total_bytes += size;
        self.entries.insert(
            (store.to_string(), id.to_string()),
            CacheEntry {
                value,
                meta: CacheEntryMeta {
                    hits: 0,
                    inserted_at: now,
                    last_access: now,
                    size,
                },
            },
        );
        self.evict_to_budget();
    }

    /// Drop an entry if present.
    pub fn remove(&mut self, store: &str, id: &str) {
        let key = (store.to_string(), id.to_string());
        if let Some(entry) = self.entries.remove(&key) {
            self.total_bytes -= entry.meta.size;
        }
    }

    /// Drop every entry belonging to a store.
    pub fn clear_store(&mut self, store: &str) {
        let keys: Vec<(String, String)> = self
            .entries
            .keys()
            .filter(|(entry_store, _)| entry_store == store)
            .cloned()
            .collect();
        for (entry_store, id) in keys {
            self.remove(&entry_store, &id);
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
            total_bytes: self.total_bytes,
        }
    }

    fn evict_to_budget(&mut self) {
        let now = unix_millis_now();
        while self.total_bytes > self.max_bytes {
            let victim = self
                .entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    let score_a = self.policy.score(&a.meta, now);
                    let score_b = self.policy.score(&b.meta, now);
                    score_a.total_cmp(&score_b)
                })
                .map(|(key, _)| key.clone());
            let Some(key) = victim else { break };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes -= entry.meta.size;
                self.evictions += 1;
            }
        }
    }
}
