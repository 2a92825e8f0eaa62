//! Memory budget pool for bounded memory usage
//!
//! Tracks a global byte budget shared by every cache layer and hands out
//! reusable, size-classed scratch buffers. The pool is the sole arbiter of
//! total bytes: layers either borrow pooled buffers (`acquire`/`release`)
//! or account artifact storage against the budget (`reserve`/`unreserve`).

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Size classes for pooled buffers, from 1 KB to 1 MB.
///
/// Requests are rounded up to the nearest class; anything beyond the largest
/// class rounds up to the next power of two.
pub const SIZE_CLASSES: [usize; 6] = [
    1024,
    4 * 1024,
    16 * 1024,
    64 * 1024,
    256 * 1024,
    1024 * 1024,
];

/// Round a size hint up to its pool size class.
pub fn size_class_for(size_hint: usize) -> usize {
    for class in SIZE_CLASSES {
        if size_hint <= class {
            return class;
        }
    }
    size_hint.next_power_of_two()
}

/// Statistics about pool usage
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Buffer acquisitions served from a free list
    pub pool_hits: u64,

    /// Buffer acquisitions that required a fresh allocation
    pub pool_misses: u64,

    /// Acquisitions denied because the budget was exhausted
    pub denied: u64,

    /// Idle buffers dropped to restore headroom
    pub evictions: u64,

    /// Bytes currently counted against the budget
    pub allocated_bytes: usize,

    /// Total budget in bytes
    pub max_bytes: usize,
}

impl PoolStats {
    /// Fraction of acquisitions served without a fresh allocation
    pub fn reuse_rate(&self) -> f64 {
        let total = self.pool_hits + self.pool_misses;
        if total == 0 {
            0.0
        } else {
            self.pool_hits as f64 / total as f64
        }
    }

    /// Current budget utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.allocated_bytes as f64 / self.max_bytes as f64
        }
    }
}

struct PoolState {
    /// Parked (idle) buffers by size class
    free: BTreeMap<usize, Vec<Vec<u8>>>,

    /// Bytes counted against the budget: outstanding buffers, parked
    /// buffers, and reservations made by the cache layers
    allocated: usize,

    stats: PoolStats,
}

impl PoolState {
    /// Drop parked buffers, largest classes first, until usage falls to
    /// `target` bytes or no idle buffers remain.
    fn evict_idle_to(&mut self, target: usize) {
        while self.allocated > target {
            // BTreeMap iterates classes in ascending order; take from the back.
            let class = match self.free.iter().rev().find(|(_, v)| !v.is_empty()) {
                Some((&class, _)) => class,
                None => break,
            };
            if let Some(bufs) = self.free.get_mut(&class) {
                if bufs.pop().is_some() {
                    self.allocated = self.allocated.saturating_sub(class);
                    self.stats.evictions += 1;
                }
                if bufs.is_empty() {
                    self.free.remove(&class);
                }
            }
        }
        self.stats.allocated_bytes = self.allocated;
    }
}

/// Memory budget pool shared by all cache layers
///
/// Guarantees `allocated_bytes() <= max_bytes()` at every observable point:
/// growth that would exceed the budget first evicts idle buffers (largest
/// size classes first, down to the target utilization), then retries once.
/// If the budget is still insufficient the request is denied — `acquire`
/// returns `None` and the caller falls back to an untracked allocation.
///
/// A single lock guards all bookkeeping.
///
/// # Example
///
/// ```
/// use lightbox_cache::memory_pool::MemoryBudgetPool;
///
/// let pool = MemoryBudgetPool::with_mb_limit(16);
///
/// if let Some(buf) = pool.acquire(48 * 1024) {
///     // buf has capacity for the 64 KB size class
///     assert!(buf.capacity() >= 48 * 1024);
///     pool.release(buf, 48 * 1024);
/// }
/// ```
pub struct MemoryBudgetPool {
    state: Mutex<PoolState>,
    max_bytes: usize,
    target_bytes: usize,
}

/// Target utilization restored by idle-buffer eviction (80% headroom rule)
const TARGET_UTILIZATION: f64 = 0.80;

impl MemoryBudgetPool {
    /// Create a pool with the given budget in bytes
    pub fn new(max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: BTreeMap::new(),
                allocated: 0,
                stats: PoolStats {
                    max_bytes,
                    ..Default::default()
                },
            }),
            max_bytes,
            target_bytes: (max_bytes as f64 * TARGET_UTILIZATION) as usize,
        }
    }

    /// Create a pool with a budget in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Total budget in bytes
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes currently counted against the budget
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().unwrap().allocated
    }

    /// Current utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            0.0
        } else {
            self.allocated_bytes() as f64 / self.max_bytes as f64
        }
    }

    /// Borrow a buffer large enough for `size_hint` bytes.
    ///
    /// Returns `None` when the budget cannot cover the request even after
    /// evicting idle buffers. The caller must then fall back to a plain,
    /// budget-untracked allocation.
    pub fn acquire(&self, size_hint: usize) -> Option<Vec<u8>> {
        let class = size_class_for(size_hint);
        let mut state = self.state.lock().unwrap();

        // Reuse a parked buffer of the same class when one exists. Parked
        // buffers are already counted against the budget.
        if let Some(bufs) = state.free.get_mut(&class) {
            if let Some(mut buf) = bufs.pop() {
                buf.clear();
                state.stats.pool_hits += 1;
                return Some(buf);
            }
        }

        if state.allocated + class > self.max_bytes {
            // Restore headroom (down to the 80% target, or further if the
            // request itself needs the room), then retry once.
            let target = self.target_bytes.min(self.max_bytes.saturating_sub(class));
            state.evict_idle_to(target);
            if state.allocated + class > self.max_bytes {
                state.stats.denied += 1;
                return None;
            }
        }

        state.allocated += class;
        state.stats.allocated_bytes = state.allocated;
        state.stats.pool_misses += 1;
        Some(Vec::with_capacity(class))
    }

    /// Return a borrowed buffer to the pool.
    ///
    /// `size_hint` must be the hint passed to the matching `acquire`; it
    /// identifies the size class the buffer belongs to.
    pub fn release(&self, buffer: Vec<u8>, size_hint: usize) {
        let class = size_class_for(size_hint);
        let mut state = self.state.lock().unwrap();
        state.free.entry(class).or_default().push(buffer);
    }

    /// Reserve bytes for artifact storage (non-pooled accounting).
    ///
    /// Evicts idle buffers first if needed. Returns `false` when the
    /// reservation cannot fit; the caller is expected to free its own
    /// entries (recording them via `unreserve`) and retry.
    pub fn reserve(&self, bytes: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.allocated + bytes > self.max_bytes {
            let target = self.max_bytes.saturating_sub(bytes);
            state.evict_idle_to(target);
        }
        if state.allocated + bytes > self.max_bytes {
            return false;
        }
        state.allocated += bytes;
        state.stats.allocated_bytes = state.allocated;
        true
    }

    /// Release a prior reservation
    pub fn unreserve(&self, bytes: usize) {
        let mut state = self.state.lock().unwrap();
        state.allocated = state.allocated.saturating_sub(bytes);
        state.stats.allocated_bytes = state.allocated;
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.state.lock().unwrap().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_size_class_rounding() {
        assert_eq!(size_class_for(1), 1024);
        assert_eq!(size_class_for(1024), 1024);
        assert_eq!(size_class_for(1025), 4 * 1024);
        assert_eq!(size_class_for(200 * 1024), 256 * 1024);
        assert_eq!(size_class_for(1024 * 1024), 1024 * 1024);
        // Beyond the ladder: next power of two
        assert_eq!(size_class_for(1024 * 1024 + 1), 2 * 1024 * 1024);
        assert_eq!(size_class_for(3 * 1024 * 1024), 4 * 1024 * 1024);
    }

    #[test]
    fn test_acquire_release_reuse() {
        let pool = MemoryBudgetPool::with_mb_limit(4);

        let buf = pool.acquire(10 * 1024).expect("budget should cover 16KB");
        assert!(buf.capacity() >= 10 * 1024);
        pool.release(buf, 10 * 1024);

        // Second acquire of the same class reuses the parked buffer
        let _buf = pool.acquire(12 * 1024).expect("reuse parked buffer");
        let stats = pool.stats();
        assert_eq!(stats.pool_hits, 1);
        assert_eq!(stats.pool_misses, 1);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let pool = MemoryBudgetPool::new(256 * 1024);

        let mut held = Vec::new();
        for _ in 0..10 {
            match pool.acquire(64 * 1024) {
                Some(buf) => {
                    assert!(pool.allocated_bytes() <= pool.max_bytes());
                    held.push(buf);
                }
                None => break,
            }
        }

        // 256KB budget holds exactly four 64KB buffers
        assert_eq!(held.len(), 4);
        assert_eq!(pool.allocated_bytes(), 256 * 1024);

        for buf in held {
            pool.release(buf, 64 * 1024);
        }
        // Released buffers stay counted until evicted
        assert_eq!(pool.allocated_bytes(), 256 * 1024);
    }

    #[test]
    fn test_denied_when_exhausted() {
        let pool = MemoryBudgetPool::new(64 * 1024);

        let _a = pool.acquire(64 * 1024).expect("first fits exactly");
        // Outstanding buffer cannot be evicted; second acquire is denied
        assert!(pool.acquire(64 * 1024).is_none());
        assert_eq!(pool.stats().denied, 1);
    }

    #[test]
    fn test_eviction_frees_largest_classes_first() {
        let pool = MemoryBudgetPool::new(512 * 1024);

        let small = pool.acquire(4096).unwrap();
        let large = pool.acquire(256 * 1024).unwrap();
        pool.release(small, 4096);
        pool.release(large, 256 * 1024);
        assert_eq!(pool.allocated_bytes(), 260 * 1024);

        // A 400KB reservation fits only after dropping an idle buffer;
        // the 256KB class goes first, the 4KB buffer survives.
        assert!(pool.reserve(400 * 1024));
        assert_eq!(pool.stats().evictions, 1);
        assert!(pool.allocated_bytes() <= pool.max_bytes());

        // The small buffer is still parked and reusable
        let _buf = pool.acquire(4096).unwrap();
        assert_eq!(pool.stats().pool_hits, 1);
    }

    #[test]
    fn test_reserve_unreserve() {
        let pool = MemoryBudgetPool::new(1024 * 1024);

        assert!(pool.reserve(512 * 1024));
        assert_eq!(pool.allocated_bytes(), 512 * 1024);

        // Too big to fit alongside the reservation
        assert!(!pool.reserve(768 * 1024));
        assert_eq!(pool.allocated_bytes(), 512 * 1024);

        pool.unreserve(512 * 1024);
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_reserve_evicts_idle_buffers() {
        let pool = MemoryBudgetPool::new(1024 * 1024);

        let buf = pool.acquire(1024 * 1024).unwrap();
        pool.release(buf, 1024 * 1024);
        assert_eq!(pool.allocated_bytes(), 1024 * 1024);

        // The parked buffer is idle, so a reservation can displace it
        assert!(pool.reserve(512 * 1024));
        assert_eq!(pool.allocated_bytes(), 512 * 1024);
    }

    #[test]
    fn test_invariant_under_mixed_operations() {
        let pool = MemoryBudgetPool::new(256 * 1024);

        let mut held = Vec::new();
        for round in 0..50 {
            let hint = SIZE_CLASSES[round % SIZE_CLASSES.len()].min(64 * 1024);
            if let Some(buf) = pool.acquire(hint) {
                assert!(pool.allocated_bytes() <= pool.max_bytes());
                if round % 2 == 0 {
                    pool.release(buf, hint);
                } else {
                    held.push((buf, hint));
                }
            }
            if round % 7 == 0 {
                if let Some((buf, hint)) = held.pop() {
                    pool.release(buf, hint);
                }
                if pool.reserve(16 * 1024) {
                    pool.unreserve(16 * 1024);
                }
            }
            assert!(pool.allocated_bytes() <= pool.max_bytes());
        }
        for (buf, hint) in held {
            pool.release(buf, hint);
        }
        assert!(pool.allocated_bytes() <= pool.max_bytes());
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(MemoryBudgetPool::with_mb_limit(8));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(buf) = pool.acquire(64 * 1024) {
                            assert!(pool.allocated_bytes() <= pool.max_bytes());
                            pool.release(buf, 64 * 1024);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.allocated_bytes() <= pool.max_bytes());
    }

    #[test]
    fn test_reuse_rate() {
        let pool = MemoryBudgetPool::with_mb_limit(4);

        let buf = pool.acquire(4096).unwrap();
        pool.release(buf, 4096);
        let _buf = pool.acquire(4096).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.reuse_rate(), 0.5);
    }
}
