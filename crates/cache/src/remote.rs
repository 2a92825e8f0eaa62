//! Disk cache for remotely-sourced files
//!
//! Files living on network mounts are copied into a local cache directory
//! so later decodes read from local disk. The cache persists a JSON index
//! (`cache_metadata.json`) beside the payload files (`<key>.cache`),
//! supports pluggable eviction (LRU / LFU / size / time), and expires
//! entries by TTL. All I/O failures degrade to a miss; nothing raises
//! across this boundary.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{EvictionPolicy, PipelineConfig};
use crate::diag::LogSuppressor;
use crate::io::FileSystemReader;
use crate::memory_pool::MemoryBudgetPool;

/// Index file name inside the cache directory
pub const INDEX_FILE: &str = "cache_metadata.json";

/// One cached remote file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub file_size: u64,
    pub created_time: f64,
    pub last_access_time: f64,
    pub access_count: u64,
    pub checksum: String,
    pub is_valid: bool,
}

/// Statistics for the remote-file cache
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RemoteCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removed: u64,
    pub total_cached_files: usize,
    pub total_cache_size: u64,
}

impl RemoteCacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Persisted index document.
///
/// Written in full on every mutation: at-least-once durability with
/// last-writer-wins semantics, no transaction log.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    cache_index: HashMap<String, RemoteEntry>,
    access_order: HashMap<String, f64>,
    access_counts: HashMap<String, u64>,
    stats: RemoteCacheStats,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derive the cache key for a remote path (first half of its SHA-256)
pub fn cache_key(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Disk-backed cache for remote files
///
/// Thread-safe; guarded by its own lock. Transient copy buffers are
/// borrowed from the shared [`MemoryBudgetPool`], falling back to an
/// untracked allocation when the budget is exhausted.
pub struct RemoteFileCache {
    state: Mutex<CacheIndex>,
    cache_dir: PathBuf,
    max_size: u64,
    ttl_secs: u64,
    headroom: f64,
    policy: EvictionPolicy,
    fs: Arc<dyn FileSystemReader>,
    pool: Arc<MemoryBudgetPool>,
    suppressor: Arc<LogSuppressor>,
}

impl RemoteFileCache {
    /// Create a remote cache from configuration.
    ///
    /// Loads any persisted index found in the cache directory; an
    /// unreadable or corrupt index resets to empty with one warning.
    pub fn new(
        config: &PipelineConfig,
        fs_reader: Arc<dyn FileSystemReader>,
        pool: Arc<MemoryBudgetPool>,
        suppressor: Arc<LogSuppressor>,
    ) -> Self {
        let cache_dir = config.remote_cache_dir.clone();
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            log::warn!("remote cache: cannot create {}: {e}", cache_dir.display());
        }

        let index = Self::load_index(&cache_dir);

        Self {
            state: Mutex::new(index),
            cache_dir,
            max_size: config.remote_cache_size,
            ttl_secs: config.remote_ttl_secs,
            headroom: config.remote_headroom,
            policy: config.remote_eviction_policy,
            fs: fs_reader,
            pool,
            suppressor,
        }
    }

    fn load_index(cache_dir: &Path) -> CacheIndex {
        let path = cache_dir.join(INDEX_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CacheIndex>(&contents) {
                Ok(mut index) => {
                    // Drop entries whose payload vanished out-of-band
                    index.cache_index.retain(|_, e| e.local_path.exists());
                    index.stats.total_cached_files = index.cache_index.len();
                    index.stats.total_cache_size =
                        index.cache_index.values().map(|e| e.file_size).sum();
                    index
                }
                Err(e) => {
                    log::warn!("remote cache: corrupt index, resetting: {e}");
                    CacheIndex::default()
                }
            },
            Err(_) => CacheIndex::default(),
        }
    }

    fn persist_index(&self, index: &CacheIndex) {
        let path = self.cache_dir.join(INDEX_FILE);
        let serialized = match serde_json::to_string_pretty(index) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("remote cache: index serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&path, serialized) {
            if self.suppressor.should_log("remote-index-write") {
                log::warn!("remote cache: index write failed: {e}");
            }
        }
    }

    fn local_path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.cache"))
    }

    fn touch(index: &mut CacheIndex, key: &str) {
        let now = now_secs();
        if let Some(entry) = index.cache_index.get_mut(key) {
            entry.last_access_time = now;
            entry.access_count += 1;
        }
        index.access_order.insert(key.to_string(), now);
        *index.access_counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Pick the next eviction victim under the configured policy
    fn victim(index: &CacheIndex, policy: EvictionPolicy) -> Option<String> {
        let entries = &index.cache_index;
        let key = match policy {
            EvictionPolicy::Lru => entries
                .iter()
                .min_by(|a, b| a.1.last_access_time.total_cmp(&b.1.last_access_time))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => entries
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::SizeBased => entries
                .iter()
                .max_by_key(|(_, e)| e.file_size)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::TimeBased => entries
                .iter()
                .min_by(|a, b| a.1.created_time.total_cmp(&b.1.created_time))
                .map(|(k, _)| k.clone()),
        };
        key
    }

    fn remove_entry(index: &mut CacheIndex, key: &str) -> Option<RemoteEntry> {
        let entry = index.cache_index.remove(key)?;
        index.access_order.remove(key);
        index.access_counts.remove(key);
        fs::remove_file(&entry.local_path).ok();
        index.stats.total_cached_files = index.cache_index.len();
        index.stats.total_cache_size = index.stats.total_cache_size.saturating_sub(entry.file_size);
        Some(entry)
    }

    /// Proactive eviction: runs only when the projected occupancy after an
    /// insert would exceed the cache size, then removes entries under the
    /// configured policy until the incoming file fits and occupancy is back
    /// under the headroom target.
    fn evict_for(&self, index: &mut CacheIndex, incoming: u64) {
        if index.stats.total_cache_size + incoming <= self.max_size {
            return;
        }
        let target = ((self.max_size as f64) * self.headroom) as u64;
        while !index.cache_index.is_empty()
            && (index.stats.total_cache_size + incoming > self.max_size
                || index.stats.total_cache_size > target)
        {
            match Self::victim(index, self.policy) {
                Some(key) => {
                    if Self::remove_entry(index, &key).is_some() {
                        index.stats.evictions += 1;
                    }
                }
                None => break,
            }
        }
    }

    /// Copy a remote file into the local cache, returning the local path.
    ///
    /// Returns the existing local path when the file is already cached.
    /// Any I/O failure is logged (rate-limited) and surfaces as `None`.
    pub fn cache_remote_file(&self, path: &Path) -> Option<PathBuf> {
        let key = cache_key(path);

        {
            let mut index = self.state.lock().unwrap();
            if let Some(entry) = index.cache_index.get(&key) {
                if entry.is_valid && entry.local_path.exists() {
                    let local = entry.local_path.clone();
                    index.stats.hits += 1;
                    Self::touch(&mut index, &key);
                    self.persist_index(&index);
                    return Some(local);
                }
                // Stale or missing payload: drop and re-fetch
                Self::remove_entry(&mut index, &key);
            }
        }

        let size = match self.fs.size_of(path) {
            Ok(s) => s,
            Err(e) => {
                if self.suppressor.should_log(&format!("remote-stat:{}", path.display())) {
                    log::warn!("remote cache: cannot stat {}: {e}", path.display());
                }
                self.state.lock().unwrap().stats.misses += 1;
                return None;
            }
        };

        // Borrow a copy buffer from the pool; fall back to an untracked
        // allocation when the budget is exhausted.
        let mut buf = self.pool.acquire(size as usize).unwrap_or_default();
        let pooled = buf.capacity() > 0;

        let read = self.fs.read_into(path, &mut buf);
        let result = read.ok().and_then(|_| {
            let checksum = hex_digest(&buf);
            let local = self.local_path_for(&key);
            match fs::write(&local, &buf) {
                Ok(()) => Some((checksum, local)),
                Err(e) => {
                    if self.suppressor.should_log("remote-copy-write") {
                        log::warn!("remote cache: write {} failed: {e}", local.display());
                    }
                    None
                }
            }
        });

        if pooled {
            self.pool.release(buf, size as usize);
        }

        let (checksum, local) = match result {
            Some(v) => v,
            None => {
                if self.suppressor.should_log(&format!("remote-read:{}", path.display())) {
                    log::warn!("remote cache: fetch of {} failed", path.display());
                }
                self.state.lock().unwrap().stats.misses += 1;
                return None;
            }
        };

        let now = now_secs();
        let entry = RemoteEntry {
            remote_path: path.to_string_lossy().into_owned(),
            local_path: local.clone(),
            file_size: size,
            created_time: now,
            last_access_time: now,
            access_count: 1,
            checksum,
            is_valid: true,
        };

        let mut index = self.state.lock().unwrap();
        self.evict_for(&mut index, size);
        index.access_order.insert(key.clone(), now);
        index.access_counts.insert(key.clone(), 1);
        index.cache_index.insert(key, entry);
        index.stats.total_cached_files = index.cache_index.len();
        index.stats.total_cache_size += size;
        self.persist_index(&index);

        Some(local)
    }

    /// Local path of a cached remote file, or `None` on a miss.
    ///
    /// Consecutive calls for an unmodified resource return the same path
    /// without altering the payload. An entry flagged suspect has its
    /// content checksum re-verified before being served.
    pub fn get_cached_path(&self, path: &Path) -> Option<PathBuf> {
        let key = cache_key(path);
        let mut index = self.state.lock().unwrap();

        let entry = match index.cache_index.get(&key) {
            Some(e) if e.local_path.exists() => e.clone(),
            _ => {
                index.stats.misses += 1;
                return None;
            }
        };

        if !entry.is_valid {
            // Suspect entry: re-verify content before trusting it
            let verified = fs::read(&entry.local_path)
                .map(|bytes| hex_digest(&bytes) == entry.checksum)
                .unwrap_or(false);
            if verified {
                if let Some(e) = index.cache_index.get_mut(&key) {
                    e.is_valid = true;
                }
            } else {
                Self::remove_entry(&mut index, &key);
                index.stats.misses += 1;
                self.persist_index(&index);
                return None;
            }
        }

        index.stats.hits += 1;
        Self::touch(&mut index, &key);
        self.persist_index(&index);
        Some(entry.local_path)
    }

    /// Whether a remote path has a cached payload (does not touch recency)
    pub fn is_cached(&self, path: &Path) -> bool {
        let key = cache_key(path);
        let index = self.state.lock().unwrap();
        index
            .cache_index
            .get(&key)
            .map(|e| e.local_path.exists())
            .unwrap_or(false)
    }

    /// Mark a cached entry suspect after an out-of-band mutation
    pub fn mark_suspect(&self, path: &Path) {
        let key = cache_key(path);
        let mut index = self.state.lock().unwrap();
        let found = match index.cache_index.get_mut(&key) {
            Some(entry) => {
                entry.is_valid = false;
                true
            }
            None => false,
        };
        if found {
            self.persist_index(&index);
        }
    }

    /// Remove a cached remote file
    pub fn remove_cached_file(&self, path: &Path) -> bool {
        let key = cache_key(path);
        let mut index = self.state.lock().unwrap();
        let removed = Self::remove_entry(&mut index, &key).is_some();
        if removed {
            self.persist_index(&index);
        }
        removed
    }

    /// Remove entries not accessed within the TTL. Returns the number removed.
    pub fn cleanup_expired_cache(&self) -> usize {
        let cutoff = now_secs() - self.ttl_secs as f64;
        let mut index = self.state.lock().unwrap();

        let expired: Vec<String> = index
            .cache_index
            .iter()
            .filter(|(_, e)| e.last_access_time < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            Self::remove_entry(&mut index, key);
            index.stats.expired_removed += 1;
        }

        if !expired.is_empty() {
            self.persist_index(&index);
        }
        expired.len()
    }

    /// Remove every cached file and reset the index
    pub fn clear_all_cache(&self) {
        let mut index = self.state.lock().unwrap();
        let keys: Vec<String> = index.cache_index.keys().cloned().collect();
        for key in keys {
            Self::remove_entry(&mut index, &key);
        }
        self.persist_index(&index);
    }

    /// Get current cache statistics
    pub fn stats(&self) -> RemoteCacheStats {
        self.state.lock().unwrap().stats
    }

    /// Total bytes of cached payloads
    pub fn total_cache_size(&self) -> u64 {
        self.state.lock().unwrap().stats.total_cache_size
    }

    /// Number of cached files
    pub fn total_cached_files(&self) -> usize {
        self.state.lock().unwrap().stats.total_cached_files
    }

    /// Cache directory path
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
