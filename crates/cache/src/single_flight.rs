//! Single-flight result cache.
//!
//! At most one computation per key runs at a time. Callers that arrive while
//! it runs subscribe to the same result. The computation runs on the blocking
//! pool, detached from any caller, so a caller that stops waiting (dropped
//! future, timeout, aborted request) leaves it running for everyone else.

use crate::key::CacheKey;
use crate::local::LruStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use survey_core::error::InsightsError;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("computation for {0} ended without a result")]
    ComputationFailed(String),
}

impl From<CacheError> for InsightsError {
    fn from(e: CacheError) -> Self {
        InsightsError::Cache(e.to_string())
    }
}

type Slot<V> = watch::Receiver<Option<Arc<V>>>;

struct State<V> {
    store: LruStore<V>,
    in_flight: HashMap<CacheKey, Slot<V>>,
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub computations: u64,
    pub evictions: u64,
}

pub struct ResultCache<V> {
    name: &'static str,
    state: Arc<Mutex<State<V>>>,
    stats: Arc<CacheStats>,
}

impl<V: Send + Sync + 'static> ResultCache<V> {
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(State {
                store: LruStore::new(ttl, max_entries),
                in_flight: HashMap::new(),
            })),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Cached value for `key`, if present and not expired. A found value
    /// counts as a hit; an absent one is not a miss until `get_or_compute` runs.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let value = self.state.lock().store.get(key.as_str())?;
        self.record_hit();
        Some(value)
    }

    fn record_hit(&self) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("insights.cache.hit", "cache" => self.name).increment(1);
    }

    /// Return the cached value for `key`, or run `compute` once and share its
    /// result with every caller waiting on the same key.
    pub async fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        let mut slot = {
            let mut state = self.state.lock();
            if let Some(value) = state.store.get(key.as_str()) {
                self.record_hit();
                return Ok(value);
            }
            if let Some(slot) = state.in_flight.get(&key) {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("insights.cache.coalesced", "cache" => self.name).increment(1);
                debug!(cache = self.name, key = %key, "Joining in-flight computation");
                slot.clone()
            } else {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("insights.cache.miss", "cache" => self.name).increment(1);
                let (tx, rx) = watch::channel(None);
                state.in_flight.insert(key.clone(), rx.clone());
                self.spawn_computation(key.clone(), tx, compute);
                rx
            }
        };

        let outcome = slot.wait_for(Option::is_some).await.map(|value| value.clone());
        match outcome {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(_) => {
                warn!(cache = self.name, key = %key, "In-flight computation ended without a result");
                Err(CacheError::ComputationFailed(key.to_string()))
            }
        }
    }

    fn spawn_computation<F>(&self, key: CacheKey, tx: watch::Sender<Option<Arc<V>>>, compute: F)
    where
        F: FnOnce() -> V + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let name = self.name;
        stats.computations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("insights.cache.computation", "cache" => name).increment(1);

        tokio::task::spawn_blocking(move || {
            let mut guard = InFlightGuard {
                state: &state,
                key: &key,
                armed: true,
            };
            let started = Instant::now();
            let value = Arc::new(compute());

            let evicted = {
                let mut s = state.lock();
                let evicted = s.store.put(key.as_str().to_string(), Arc::clone(&value));
                s.in_flight.remove(&key);
                evicted
            };
            guard.armed = false;

            if evicted > 0 {
                stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                metrics::counter!("insights.cache.evicted", "cache" => name)
                    .increment(evicted as u64);
            }
            debug!(
                cache = name,
                key = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Computation finished"
            );
            tx.send_replace(Some(value));
        });
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let evicted = self.state.lock().store.evict_expired();
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::counter!("insights.cache.evicted", "cache" => self.name)
                .increment(evicted as u64);
        }
        evicted
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.state.lock().store.remove(key.as_str())
    }

    /// Remove all stored results. In-flight computations still complete and store theirs.
    pub fn clear(&self) {
        self.state.lock().store.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            computations: self.stats.computations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight slot if the computation panics, so the next caller retries.
struct InFlightGuard<'a, V> {
    state: &'a Mutex<State<V>>,
    key: &'a CacheKey,
    armed: bool,
}

impl<V> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().in_flight.remove(self.key);
        }
    }
}
