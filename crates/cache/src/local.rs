//! In-process TTL + LRU store for computed analytics results.
//! Not synchronized on its own; [`crate::ResultCache`] guards it with a mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
    last_used: u64,
}

/// Size-bounded store. Expired entries are dropped on read; when full, expired
/// entries are purged first and the least recently used entry goes next.
pub struct LruStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    tick: u64,
    ttl: Duration,
    max_entries: usize,
}

impl<V> LruStore<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(4096)),
            recency: BTreeMap::new(),
            tick: 0,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live value and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<V>> {
        let expired = self.entries.get(key)?.inserted_at.elapsed() > self.ttl;
        if expired {
            self.remove(key);
            return None;
        }
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.last_used);
        entry.last_used = tick;
        self.recency.insert(tick, key.to_string());
        Some(Arc::clone(&entry.value))
    }

    /// Insert or replace a value. Returns how many entries were evicted to make room.
    pub fn put(&mut self, key: String, value: Arc<V>) -> usize {
        let mut evicted = 0;
        if let Some(old) = self.entries.remove(&key) {
            self.recency.remove(&old.last_used);
        } else if self.entries.len() >= self.max_entries {
            evicted += self.evict_expired();
            while self.entries.len() >= self.max_entries {
                let Some((_, lru_key)) = self.recency.pop_first() else {
                    break;
                };
                self.entries.remove(&lru_key);
                evicted += 1;
            }
        }

        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.recency.remove(&entry.last_used);
                true
            }
            None => false,
        }
    }

    /// Remove expired entries. Call this periodically from a background task.
    pub fn evict_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let expired: Vec<(String, u64)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() > ttl)
            .map(|(k, e)| (k.clone(), e.last_used))
            .collect();
        for (key, tick) in &expired {
            self.entries.remove(key);
            self.recency.remove(tick);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
