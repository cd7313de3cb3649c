//! Thread-safe LRU cache with hit, miss and eviction accounting.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache as Store;
use parking_lot::RwLock;

/// Capacity used by [`LruCache::default`].
pub const DEFAULT_CAPACITY: usize = 1000;
/// Capacity used when zero is requested.
pub const ZERO_CAPACITY_FALLBACK: usize = 100;

/// Called with each evicted entry, after the cache lock is released.
pub type EvictionCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
}

/// Strict LRU map. `get` promotes the entry; inserting a new key into a
/// full cache evicts the least recently used one first.
///
/// # Example
///
/// ```
/// use formulary::LruCache;
///
/// let cache = LruCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.get(&"a");
/// cache.put("c", 3);
/// assert!(!cache.contains(&"b"));
/// assert_eq!(cache.stats().evictions, 1);
/// ```
pub struct LruCache<K, V> {
    store: RwLock<Store<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    on_evict: Option<EvictionCallback<K, V>>,
}

fn capacity_of(requested: usize) -> NonZeroUsize {
    let capacity = if requested == 0 {
        ZERO_CAPACITY_FALLBACK
    } else {
        requested
    };
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries; 0 selects
    /// [`ZERO_CAPACITY_FALLBACK`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: RwLock::new(Store::new(capacity_of(capacity))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            on_evict: None,
        }
    }

    /// Install a callback that receives every evicted entry.
    #[must_use]
    pub fn with_eviction_callback(mut self, f: impl Fn(&K, &V) + Send + Sync + 'static) -> Self {
        self.on_evict = Some(Arc::new(f));
        self
    }

    /// Look up `key`, promoting it to most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let found = self.store.write().get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert or update `key`. Updating promotes the entry and never evicts.
    pub fn put(&self, key: K, value: V) {
        let evicted = {
            let mut store = self.store.write();
            if store.contains(&key) {
                store.put(key, value);
                None
            } else {
                let evicted = if store.len() >= store.cap().get() {
                    store.pop_lru()
                } else {
                    None
                };
                store.put(key, value);
                evicted
            }
        };
        if let Some((k, v)) = evicted {
            self.evicted(&k, &v);
        }
    }

    /// Membership test that does not touch recency.
    #[must_use]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.read().contains(key)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.write().pop(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.store.read().cap().get()
    }

    /// Change the capacity, evicting least recently used entries one at a
    /// time until the cache fits. A capacity of 0 is ignored.
    pub fn resize(&self, capacity: usize) {
        if capacity == 0 {
            return;
        }
        let evicted = {
            let mut store = self.store.write();
            let mut evicted = Vec::new();
            while store.len() > capacity {
                match store.pop_lru() {
                    Some(entry) => evicted.push(entry),
                    None => break,
                }
            }
            store.resize(capacity_of(capacity));
            evicted
        };
        for (k, v) in &evicted {
            self.evicted(k, v);
        }
    }

    /// Drop every entry and reset the counters. Capacity is kept.
    pub fn clear(&self) {
        self.store.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let (size, capacity) = {
            let store = self.store.read();
            (store.len(), store.cap().get())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size,
            capacity,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn evicted(&self, key: &K, value: &V) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "cache evicted an entry ({} so far)",
            self.evictions.load(Ordering::Relaxed)
        );
        if let Some(callback) = &self.on_evict {
            callback(key, value);
        }
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K: Hash + Eq, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        f.debug_struct("LruCache")
            .field("size", &store.len())
            .field("capacity", &store.cap().get())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("evictions", &self.evictions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
