//! Small TTL cache for read-heavy queries, keyed by the query text.
//!
//! Entries expire after `ttl`; once `capacity` is reached the oldest entry is
//! evicted. Write paths that can change cached results call
//! [`QueryCache::invalidate_all`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

pub struct QueryCache<V> {
    inner: Mutex<CacheInner<V>>,
    capacity: usize,
    ttl: Duration,
}

struct CacheInner<V> {
    entries: HashMap<String, (Instant, V)>,
    // Insertion order, oldest first.
    order: VecDeque<String>,
}

impl<V: Clone> QueryCache<V> {
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                debug!(key, "Query cache hit");
                return Some(value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let mut inner = self.lock();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| *k != key);
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, (Instant::now(), value));

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        let mut inner = self.lock();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        if dropped > 0 {
            debug!(dropped, "Query cache invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        // The cached data is still consistent after a panic elsewhere.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
