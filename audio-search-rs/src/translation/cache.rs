//! Bounded, time-expiring cache with least-recently-used eviction.
//!
//! Reads and writes both move an entry to the most-recently-used position.
//! Expiry is checked lazily on read; capacity eviction ignores TTL.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    tick: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// recency tick → key, oldest first
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.tick);
        }
    }
}

pub struct TtlLruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    capacity: usize,
    name: &'static str,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
            ttl,
            capacity: capacity.max(1),
            name,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let inserted_at = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at,
            None => {
                tracing::info!(cache = self.name, "Cache miss");
                return None;
            }
        };
        if now.saturating_duration_since(inserted_at) > self.ttl {
            inner.remove(key);
            tracing::info!(cache = self.name, "Cache entry expired");
            return None;
        }
        inner.touch(key);
        tracing::info!(cache = self.name, "Cache hit");
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.remove(&key);
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                tick,
            },
        );
        while inner.entries.len() > self.capacity {
            let oldest = match inner.order.iter().next() {
                Some((_, k)) => k.clone(),
                None => break,
            };
            inner.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
