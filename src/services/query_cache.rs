// Aggregation result cache
//
// Document aggregations are expensive and their dashboards refresh often,
// so results are kept for a short TTL. Entries are keyed by the target,
// the pipeline template and the bound parameters, and evicted LRU-first
// once the cache is full.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::models::{BoundParams, ResultFrame};

struct CachedFrame {
    frame: ResultFrame,
    cached_at: Instant,
    ttl: Duration,
    last_used: u64,
}

impl CachedFrame {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) >= self.ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedFrame>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit ratio in `0.0..=1.0`
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL + LRU cache of document aggregation results.
pub struct QueryResultCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    ttl: Duration,
}

impl QueryResultCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key for one aggregation over the unbound pipeline template, so
    /// relative-time stages resolved at bind time do not defeat caching.
    pub fn key(database: &str, collection: &str, pipeline: &[Value], params: &BoundParams) -> String {
        let mut hasher = DefaultHasher::new();
        for stage in pipeline {
            stage.to_string().hash(&mut hasher);
        }
        params.hash(&mut hasher);
        format!("{}.{}:{:x}", database, collection, hasher.finish())
    }

    pub fn get(&self, key: &str) -> Option<ResultFrame> {
        let mut state = self.lock();
        let tick = state.next_tick();
        let now = Instant::now();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_used = tick;
                let frame = entry.frame.clone();
                state.stats.hits += 1;
                tracing::debug!("Aggregation cache hit: {}", key);
                return Some(frame);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
            state.stats.expirations += 1;
        }
        state.stats.misses += 1;
        tracing::debug!("Aggregation cache miss: {}", key);
        None
    }

    pub fn put(&self, key: String, frame: ResultFrame) {
        let mut state = self.lock();
        let tick = state.next_tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            Self::evict(&mut state);
        }

        state.entries.insert(
            key,
            CachedFrame {
                frame,
                cached_at: Instant::now(),
                ttl: self.ttl,
                last_used: tick,
            },
        );
    }

    // Expired entries go first; otherwise the least recently used one.
    fn evict(state: &mut CacheState) {
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            for key in &expired {
                state.entries.remove(key);
            }
            state.stats.expirations += expired.len() as u64;
            return;
        }

        let oldest = state
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            state.entries.remove(&key);
            state.stats.evictions += 1;
            tracing::debug!("Evicted aggregation cache entry: {}", key);
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        state.entries.clear();
        tracing::info!("Cleared {} aggregation cache entries", count);
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
