//! Capacity-bounded image cache with LRU eviction
//!
//! Structure: `HashMap<K, Arc<RgbaImage>>` + `IndexSet<K>` recency queue.
//! - O(1) lookup via HashMap
//! - IndexSet preserves insertion order, front = least recently used
//! - `get` moves the key to the back
//!
//! Two instances exist per session: the playback cache (small, keyed by image
//! handle) and the general cache (larger, keyed by frame index + target size).
//! Both report bytes to the shared `CacheManager`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use indexmap::IndexSet;
use log::{debug, trace};

use crate::core::cache_man::CacheManager;

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

fn image_mem(img: &RgbaImage) -> usize {
    img.as_raw().len()
}

/// Entries and recency order behind one lock.
#[derive(Debug)]
struct Inner<K> {
    map: HashMap<K, Arc<RgbaImage>>,
    order: IndexSet<K>,
}

#[derive(Debug)]
pub struct BoundedCache<K> {
    name: &'static str,
    inner: Mutex<Inner<K>>,
    manager: Arc<CacheManager>,
    stats: CacheStats,
    capacity: usize,
}

impl<K> BoundedCache<K>
where
    K: Hash + Eq + Clone + Debug,
{
    /// # Arguments
    /// * `name` - label for logs ("playback", "general")
    /// * `capacity` - max entries (at least 1)
    pub fn new(name: &'static str, capacity: usize, manager: Arc<CacheManager>) -> Self {
        let capacity = capacity.max(1);
        debug!("BoundedCache '{}' created: capacity={}", name, capacity);
        Self {
            name,
            inner: Mutex::new(Inner {
                map: HashMap::with_capacity(capacity + 1),
                order: IndexSet::with_capacity(capacity + 1),
            }),
            manager,
            stats: CacheStats::default(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lookup, refreshing recency on hit.
    pub fn get(&self, key: &K) -> Option<Arc<RgbaImage>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let found = inner.map.get(key).cloned();
        if found.is_some() {
            self.stats.record_hit();
            inner.order.shift_remove(key);
            inner.order.insert(key.clone());
        } else {
            self.stats.record_miss();
        }
        found
    }

    /// Presence check without touching recency or stats.
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.contains_key(key)
    }

    /// Insert (or replace) and evict until within capacity and memory limit.
    pub fn insert(&self, key: K, image: Arc<RgbaImage>) {
        let size = image_mem(&image);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(old) = inner.map.remove(&key) {
            self.manager.free_memory(image_mem(&old));
            inner.order.shift_remove(&key);
        }

        inner.map.insert(key.clone(), image);
        inner.order.insert(key);
        self.manager.add_memory(size);

        while inner.map.len() > self.capacity {
            if !self.evict_oldest(&mut inner) {
                break;
            }
        }
        // Memory ceiling is shared; never evict the entry just inserted
        while self.manager.check_memory_limit() && inner.map.len() > 1 {
            if !self.evict_oldest(&mut inner) {
                break;
            }
        }
        trace!("Cache '{}': {} entries", self.name, inner.map.len());
    }

    fn evict_oldest(&self, inner: &mut Inner<K>) -> bool {
        let Some(key) = inner.order.shift_remove_index(0) else {
            return false;
        };
        if let Some(evicted) = inner.map.remove(&key) {
            self.manager.free_memory(image_mem(&evicted));
            trace!("Cache '{}' evicted {:?}", self.name, key);
        }
        true
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.order.shift_remove(key);
        match inner.map.remove(key) {
            Some(old) => {
                self.manager.free_memory(image_mem(&old));
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for img in inner.map.values() {
            self.manager.free_memory(image_mem(img));
        }
        let n = inner.map.len();
        inner.map.clear();
        inner.order.clear();
        debug!("Cache '{}' cleared ({} entries)", self.name, n);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
