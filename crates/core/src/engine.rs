//! Engine coordinator
//!
//! `ImageEngine` wires the cache layers, the decode selector, the scheduler
//! and the preload pool into one object, constructed once and passed by
//! handle to collaborators. It owns the worker pool and the debounce timer
//! thread; the navigation-handling path never blocks on I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use lightbox_cache::{
    FetchStrategy, FileSystemReader, HotCacheStats, HotImageCache, ImageHandle, LogSuppressor,
    MemoryBudgetPool, PathPrefixDetector, PipelineConfig, PoolStats, RemoteCacheStats,
    RemoteFileCache, RemoteFileDetector, StdFileSystem,
};
use lightbox_decode::{
    run_progressive, DecodeCategory, ImageCrateDecoder, NativeImageDecoder, ProgressiveDecode,
    RequestPriority, StrategySelector,
};
use lightbox_scheduler::{
    default_pool_size, JobPriority, JobScheduler, JobType, SchedulerStats, WorkerPool,
    WorkerPoolConfig,
};

use crate::pacer::{NavigationOutcome, NavigationPacer};
use crate::preload::{BidirectionalPreloadPool, PreloadStats, RequestHandle};

/// Aggregated cache statistics across every layer
#[derive(Debug, Clone, Copy)]
pub struct CacheStatsReport {
    /// Overall hit rate across the hot and remote layers
    pub hit_rate: f64,

    /// Bytes currently counted against the memory budget
    pub occupancy_bytes: usize,

    /// Evictions across all layers (hot, remote, pool)
    pub eviction_count: u64,

    /// Per-layer breakdown
    pub hot: HotCacheStats,
    pub remote: RemoteCacheStats,
    pub pool: PoolStats,
    pub scheduler: SchedulerStats,
    pub preload: PreloadStats,

    /// Diagnostics swallowed by the repeated-failure rate limiter
    pub suppressed_logs: u64,
}

struct PacerShared {
    pacer: NavigationPacer,
    base_forward: usize,
    base_backward: usize,
    pending_advance: Option<i8>,
    stop: bool,
}

/// The image pipeline engine
///
/// # Example
///
/// ```no_run
/// use lightbox_cache::PipelineConfig;
/// use lightbox_core::ImageEngine;
/// use lightbox_decode::RequestPriority;
///
/// let mut engine = ImageEngine::new(PipelineConfig::default());
/// engine.set_sequence(vec!["photos/a.jpg".into(), "photos/b.jpg".into()]);
///
/// let handle = engine.request_image("photos/a.jpg", Some((1200, 800)), RequestPriority::Current);
/// if let Some(image) = handle.wait() {
///     println!("{}x{}", image.width, image.height);
/// }
/// engine.shutdown();
/// ```
pub struct ImageEngine {
    config: PipelineConfig,
    pool: Arc<MemoryBudgetPool>,
    hot: Arc<HotImageCache>,
    remote: Arc<RemoteFileCache>,
    selector: Arc<StrategySelector>,
    detector: Arc<dyn RemoteFileDetector>,
    scheduler: Arc<JobScheduler>,
    preload: Arc<BidirectionalPreloadPool>,
    suppressor: Arc<LogSuppressor>,
    workers: Option<WorkerPool>,
    pacer_shared: Arc<(Mutex<PacerShared>, Condvar)>,
    debounce_thread: Option<JoinHandle<()>>,
}

impl ImageEngine {
    /// Create an engine with the default platform components
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(ImageCrateDecoder),
            Arc::new(StdFileSystem),
            Arc::new(PathPrefixDetector::default()),
            None,
        )
    }

    /// Create an engine with injected collaborators.
    ///
    /// Tests pass fakes here; production callers inject platform-specific
    /// decoders and detectors.
    pub fn with_components(
        config: PipelineConfig,
        decoder: Arc<dyn NativeImageDecoder>,
        fs_reader: Arc<dyn FileSystemReader>,
        detector: Arc<dyn RemoteFileDetector>,
        worker_count: Option<usize>,
    ) -> Self {
        let suppressor = Arc::new(LogSuppressor::new(config.suppress_after));
        let pool = Arc::new(MemoryBudgetPool::new(config.pool_budget));
        let hot = Arc::new(HotImageCache::new(
            Arc::clone(&pool),
            config.hot_cache_size,
        ));
        let remote = Arc::new(RemoteFileCache::new(
            &config,
            Arc::clone(&fs_reader),
            Arc::clone(&pool),
            Arc::clone(&suppressor),
        ));
        let selector = Arc::new(StrategySelector::new(
            &config,
            decoder,
            fs_reader,
            Arc::clone(&pool),
            Arc::clone(&suppressor),
        ));
        let scheduler = Arc::new(JobScheduler::new());
        let preload = Arc::new(BidirectionalPreloadPool::new(
            &config,
            Arc::clone(&hot),
            Arc::clone(&scheduler),
        ));

        let executor = {
            let preload = Arc::clone(&preload);
            let selector = Arc::clone(&selector);
            let remote = Arc::clone(&remote);
            let detector: Arc<dyn RemoteFileDetector> = Arc::clone(&detector);
            Arc::new(
                move |job: &lightbox_scheduler::Job,
                      token: &lightbox_scheduler::CancellationToken| {
                    match &job.job_type {
                        JobType::DecodeImage {
                            key,
                            generation,
                            target,
                            ..
                        } => {
                            if token.is_cancelled() {
                                return;
                            }
                            let path = PathBuf::from(key);
                            let local = if detector.is_remote_path(&path) {
                                let strategy =
                                    FetchStrategy::for_latency(detector.network_latency_ms(&path));
                                log::debug!(
                                    "fetching {} ({:?} strategy)",
                                    path.display(),
                                    strategy
                                );
                                match remote.cache_remote_file(&path) {
                                    Some(local) => local,
                                    None => {
                                        preload.complete_decode(key, *generation, None);
                                        return;
                                    }
                                }
                            } else {
                                path
                            };

                            let result = selector.decode(&local, *target);
                            // The pool decides whether this result is still
                            // wanted; stale results never reach the cache.
                            preload.complete_decode(key, *generation, result.image);
                        }
                        JobType::FetchRemote { path } => {
                            remote.cache_remote_file(path);
                        }
                        JobType::SweepExpired => {
                            let removed = remote.cleanup_expired_cache();
                            if removed > 0 {
                                log::debug!("ttl sweep removed {removed} cached files");
                            }
                        }
                    }
                },
            )
        };

        let worker_config = WorkerPoolConfig::new(worker_count.unwrap_or_else(default_pool_size))
            .with_poll_interval(std::time::Duration::from_millis(5));
        let workers = WorkerPool::new(Arc::clone(&scheduler), executor, worker_config);

        let pacer_shared = Arc::new((
            Mutex::new(PacerShared {
                pacer: NavigationPacer::new(config.slow_debounce_ms),
                base_forward: config.forward_window,
                base_backward: config.backward_window,
                pending_advance: None,
                stop: false,
            }),
            Condvar::new(),
        ));
        let debounce_thread = Some(Self::spawn_debounce_thread(
            Arc::clone(&pacer_shared),
            Arc::clone(&preload),
        ));

        Self {
            config,
            pool,
            hot,
            remote,
            selector,
            detector,
            scheduler,
            preload,
            suppressor,
            workers: Some(workers),
            pacer_shared,
            debounce_thread,
        }
    }

    /// The single debounce timer: waits for the pacer deadline, replacing
    /// it whenever a new intent arrives, then applies the coalesced net
    /// step as one navigation.
    fn spawn_debounce_thread(
        shared: Arc<(Mutex<PacerShared>, Condvar)>,
        preload: Arc<BidirectionalPreloadPool>,
    ) -> JoinHandle<()> {
        thread::Builder::new()
            .name("lightbox-nav-debounce".to_string())
            .spawn(move || {
                let (lock, cvar) = &*shared;
                let mut guard = lock.lock().unwrap();
                loop {
                    if guard.stop {
                        break;
                    }
                    match guard.pacer.pending_deadline() {
                        None => {
                            guard = cvar.wait(guard).unwrap();
                        }
                        Some(deadline) => {
                            let now = Instant::now();
                            if now < deadline {
                                let (g, _) = cvar.wait_timeout(guard, deadline - now).unwrap();
                                guard = g;
                                continue;
                            }
                            if let Some(net) = guard.pacer.take_due(now) {
                                let widths = guard
                                    .pacer
                                    .window_widths(guard.base_forward, guard.base_backward);
                                let bias = guard.pacer.direction_bias();
                                let skip = guard.pacer.skip_intermediate();
                                drop(guard);

                                let outcome = preload.apply_net_step(net, widths, bias, skip);

                                guard = lock.lock().unwrap();
                                if let NavigationOutcome::AdvanceSequence { direction } = outcome {
                                    guard.pending_advance = Some(direction);
                                    log::debug!(
                                        "navigation overflow: advance to adjacent sequence ({direction})"
                                    );
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn debounce thread")
    }

    /// Replace the browsing sequence
    pub fn set_sequence(&self, keys: Vec<String>) {
        self.preload.set_sequence(keys);
    }

    /// Request an artifact for a key
    pub fn request_image(
        &self,
        key: &str,
        target: Option<(u32, u32)>,
        priority: RequestPriority,
    ) -> RequestHandle {
        self.preload.request(key, target, priority)
    }

    /// Buffer a navigation intent (debounced and coalesced).
    ///
    /// Rapid intents arriving before the debounce deadline are summed into
    /// one net navigation; the deadline tracks navigation velocity.
    pub fn navigate(&self, step: i64) {
        let (lock, cvar) = &*self.pacer_shared;
        let mut guard = lock.lock().unwrap();
        guard.pacer.record_intent(step, Instant::now());
        cvar.notify_one();
    }

    /// Apply a navigation immediately, bypassing the debounce timer.
    ///
    /// Recomputes the prefetch window around `to_index` and reconciles
    /// scheduled decode work.
    pub fn notify_navigation(&self, from_index: usize, to_index: usize, sequence_length: usize) {
        let expected = self.preload.sequence_len();
        if sequence_length != expected {
            log::debug!(
                "notify_navigation: caller sequence length {sequence_length} != {expected}"
            );
        }

        let (widths, bias, skip) = {
            let guard = self.pacer_shared.0.lock().unwrap();
            (
                guard
                    .pacer
                    .window_widths(guard.base_forward, guard.base_backward),
                guard.pacer.direction_bias(),
                guard.pacer.skip_intermediate(),
            )
        };
        self.preload
            .notify_navigation(from_index, to_index, widths, bias, skip);
    }

    /// A pending advance-to-adjacent-sequence instruction, if the last
    /// coalesced navigation overflowed the sequence boundary.
    pub fn take_sequence_advance(&self) -> Option<i8> {
        let mut guard = self.pacer_shared.0.lock().unwrap();
        guard.pending_advance.take()
    }

    /// Progressive multi-stage decode for an ultra-high-pixel image.
    ///
    /// Returns `None` when the image does not classify as ultra-high-pixel
    /// (or cannot be probed). Stages arrive over the returned channel in
    /// order, at most three of them.
    pub fn request_progressive(
        &self,
        key: &str,
        target: Option<(u32, u32)>,
    ) -> Option<ProgressiveDecode> {
        let path = PathBuf::from(key);
        let local = if self.detector.is_remote_path(&path) {
            self.remote.cache_remote_file(&path)?
        } else {
            path
        };

        let (category, dims, _) = self.selector.classify_path(&local);
        if category != DecodeCategory::UltraHighPixel {
            return None;
        }
        let full_dims = dims?;

        let decoder = Arc::clone(self.selector.decoder());
        let threshold = self.config.progressive_stage_threshold;
        let (tx, consumer) = ProgressiveDecode::pair();

        thread::Builder::new()
            .name("lightbox-progressive".to_string())
            .spawn(move || {
                run_progressive(
                    decoder.as_ref(),
                    &local,
                    full_dims,
                    target,
                    threshold,
                    &mut |stage| tx.send(stage).is_ok(),
                );
            })
            .ok()?;

        Some(consumer)
    }

    /// Remove a key from every layer (after an out-of-band mutation such
    /// as rotation) and cancel any in-flight decode for it.
    pub fn invalidate(&self, key: &str) {
        self.preload.cancel_key(key);
        self.hot.invalidate(key);
        self.remote.remove_cached_file(Path::new(key));
    }

    /// Queue a TTL sweep of the remote cache at maintenance priority
    pub fn schedule_ttl_sweep(&self) {
        self.scheduler
            .submit(JobPriority::Maintenance, JobType::SweepExpired);
    }

    /// Whether a key currently has a hot-cache artifact
    pub fn hot_contains(&self, key: &str) -> bool {
        self.hot.contains(key)
    }

    /// Fetch a hot-cache artifact without scheduling anything
    pub fn peek_hot(&self, key: &str) -> Option<ImageHandle> {
        self.hot.get(key)
    }

    /// Current index in the browsing sequence
    pub fn current_index(&self) -> usize {
        self.preload.current_index()
    }

    /// Advisory fetch strategy for a path, from measured latency
    pub fn fetch_strategy_for(&self, path: &Path) -> FetchStrategy {
        FetchStrategy::for_latency(self.detector.network_latency_ms(path))
    }

    /// Aggregated statistics across every layer
    pub fn get_cache_stats(&self) -> CacheStatsReport {
        let hot = self.hot.stats();
        let remote = self.remote.stats();
        let pool = self.pool.stats();
        let scheduler = self.scheduler.stats();
        let preload = self.preload.stats();

        let lookups = hot.hits + hot.misses + remote.hits + remote.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            (hot.hits + remote.hits) as f64 / lookups as f64
        };

        CacheStatsReport {
            hit_rate,
            occupancy_bytes: pool.allocated_bytes,
            eviction_count: hot.evictions + remote.evictions + pool.evictions,
            hot,
            remote,
            pool,
            scheduler,
            preload,
            suppressed_logs: self.suppressor.suppressed_total(),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stop the debounce timer and the worker pool, waiting for workers to
    /// finish their current jobs.
    pub fn shutdown(&mut self) {
        {
            let (lock, cvar) = &*self.pacer_shared;
            let mut guard = lock.lock().unwrap();
            guard.stop = true;
            cvar.notify_all();
        }
        if let Some(thread) = self.debounce_thread.take() {
            let _ = thread.join();
        }
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
    }
}

impl Drop for ImageEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
