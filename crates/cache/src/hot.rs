//! Hot cache of decoded artifacts with LRU eviction
//!
//! In-memory cache keyed by resource identifier, holding decoded artifacts
//! for immediate redisplay. Eviction is lazy: entries leaving the preload
//! retention window are only demoted (made next in line for eviction);
//! bytes are reclaimed when an insert runs into the cache limit or the
//! shared memory budget.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::artifact::DecodedImage;
use crate::memory_pool::MemoryBudgetPool;

/// Statistics about hot cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct HotCacheStats {
    /// Number of entries currently cached
    pub entry_count: usize,

    /// Bytes used by cached artifacts
    pub bytes_used: usize,

    /// Maximum bytes allowed for this layer
    pub bytes_limit: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries evicted
    pub evictions: u64,

    /// Inserts skipped because the shared budget was exhausted
    pub rejected: u64,
}

impl HotCacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Memory utilization of this layer (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.bytes_limit == 0 {
            0.0
        } else {
            self.bytes_used as f64 / self.bytes_limit as f64
        }
    }
}

struct Entry {
    image: Arc<DecodedImage>,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    valid: bool,
}

struct HotState {
    entries: HashMap<String, Entry>,

    /// LRU queue: front = next eviction candidate, back = most recently used
    lru_queue: VecDeque<String>,

    bytes_used: usize,
    stats: HotCacheStats,
}

impl HotState {
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn evict_front(&mut self, budget: &MemoryBudgetPool) -> bool {
        if let Some(key) = self.lru_queue.pop_front() {
            if let Some(entry) = self.entries.remove(&key) {
                let size = entry.image.mem_size();
                self.bytes_used = self.bytes_used.saturating_sub(size);
                budget.unreserve(size);
                self.stats.entry_count = self.entries.len();
                self.stats.bytes_used = self.bytes_used;
                self.stats.evictions += 1;
                return true;
            }
        }
        false
    }

    /// Evict entries until `required` more bytes fit under the layer limit.
    fn evict_to_fit(&mut self, required: usize, budget: &MemoryBudgetPool) {
        while self.bytes_used + required > self.stats.bytes_limit && !self.entries.is_empty() {
            if !self.evict_front(budget) {
                break;
            }
        }
    }
}

/// LRU cache of decoded artifacts
///
/// Thread-safe; guarded by its own lock and never reaching into other
/// layers. Artifact bytes are reserved against the shared
/// [`MemoryBudgetPool`], which stays the sole arbiter of total memory.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lightbox_cache::artifact::DecodedImage;
/// use lightbox_cache::hot::HotImageCache;
/// use lightbox_cache::memory_pool::MemoryBudgetPool;
///
/// let budget = Arc::new(MemoryBudgetPool::with_mb_limit(64));
/// let cache = HotImageCache::new(budget, 32 * 1024 * 1024);
///
/// let image = Arc::new(DecodedImage::new(vec![0; 256 * 256 * 4], 256, 256, 4096, "PNG"));
/// cache.put("photos/a.jpg", image);
///
/// assert!(cache.contains("photos/a.jpg"));
/// assert!(cache.get("photos/a.jpg").is_some());
/// ```
pub struct HotImageCache {
    state: Mutex<HotState>,
    budget: Arc<MemoryBudgetPool>,
}

impl HotImageCache {
    /// Create a hot cache with the given per-layer byte limit
    pub fn new(budget: Arc<MemoryBudgetPool>, bytes_limit: usize) -> Self {
        Self {
            state: Mutex::new(HotState {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                bytes_used: 0,
                stats: HotCacheStats {
                    bytes_limit,
                    ..Default::default()
                },
            }),
            budget,
        }
    }

    /// Store a decoded artifact.
    ///
    /// Evicts least-recently-used entries when the layer limit or the
    /// shared budget would be exceeded. If the shared budget cannot cover
    /// the artifact even after this cache has drained itself, the insert
    /// is skipped and counted in `rejected`.
    pub fn put(&self, key: &str, image: Arc<DecodedImage>) {
        let mut state = self.state.lock().unwrap();
        let size = image.mem_size();

        if let Some(old) = state.entries.remove(key) {
            let old_size = old.image.mem_size();
            state.bytes_used = state.bytes_used.saturating_sub(old_size);
            self.budget.unreserve(old_size);
            state.lru_queue.retain(|k| k != key);
        }

        state.evict_to_fit(size, &self.budget);

        // The shared budget has the final say; free more of our own
        // entries if the reservation is refused.
        while !self.budget.reserve(size) {
            if !state.evict_front(&self.budget) {
                state.stats.rejected += 1;
                log::debug!("hot cache: budget exhausted, dropping artifact for {key}");
                return;
            }
        }

        let now = Instant::now();
        state.bytes_used += size;
        state.entries.insert(
            key.to_string(),
            Entry {
                image,
                created_at: now,
                last_access: now,
                access_count: 0,
                valid: true,
            },
        );
        state.touch(key);
        state.stats.entry_count = state.entries.len();
        state.stats.bytes_used = state.bytes_used;
    }

    /// Retrieve an artifact, updating recency and access metadata
    pub fn get(&self, key: &str) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock().unwrap();

        let hit = match state.entries.get_mut(key) {
            Some(entry) if entry.valid => {
                entry.last_access = Instant::now();
                entry.access_count += 1;
                Some(Arc::clone(&entry.image))
            }
            _ => None,
        };

        match hit {
            Some(image) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(image)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a key without updating recency
    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.get(key).map(|e| e.valid).unwrap_or(false)
    }

    /// Remove an entry, returning its artifact
    pub fn remove(&self, key: &str) -> Option<Arc<DecodedImage>> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.remove(key) {
            let size = entry.image.mem_size();
            state.bytes_used = state.bytes_used.saturating_sub(size);
            self.budget.unreserve(size);
            state.lru_queue.retain(|k| k != key);
            state.stats.entry_count = state.entries.len();
            state.stats.bytes_used = state.bytes_used;
            Some(entry.image)
        } else {
            None
        }
    }

    /// Invalidate an entry after an out-of-band mutation (e.g. rotation).
    ///
    /// The entry is marked invalid and removed; a later `get` is a miss.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.valid = false;
        } else {
            return false;
        }
        drop(state);
        self.remove(key).is_some()
    }

    /// Demote an entry to the front of the eviction order.
    ///
    /// This is the eviction *hint* used when a key leaves the retention
    /// window: the entry stays resident, but becomes the first candidate
    /// when budget pressure forces eviction.
    pub fn demote(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(key) {
            state.lru_queue.retain(|k| k != key);
            state.lru_queue.push_front(key.to_string());
        }
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let freed = state.bytes_used;
        state.entries.clear();
        state.lru_queue.clear();
        state.bytes_used = 0;
        state.stats.entry_count = 0;
        state.stats.bytes_used = 0;
        self.budget.unreserve(freed);
    }

    /// Number of times a key has been accessed since insertion
    pub fn access_count(&self, key: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.entries.get(key).map(|e| e.access_count)
    }

    /// Age of an entry since insertion
    pub fn entry_age(&self, key: &str) -> Option<std::time::Duration> {
        let state = self.state.lock().unwrap();
        state.entries.get(key).map(|e| e.created_at.elapsed())
    }

    /// Get current cache statistics
    pub fn stats(&self) -> HotCacheStats {
        self.state.lock().unwrap().stats
    }

    /// Bytes currently used by this layer
    pub fn bytes_used(&self) -> usize {
        self.state.lock().unwrap().bytes_used
    }
}
