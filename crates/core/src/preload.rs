//! Bidirectional preload pool
//!
//! Owns the browsing sequence and the single-flight table. Navigation
//! recomputes the prefetch set and schedules decode jobs for indices that
//! are neither cached nor in flight; keys leaving the retention window get
//! eviction hints (demotion) and, at high navigation speed, outright
//! cancellation. A decode completing after its context changed is discarded
//! before it can touch the hot cache.
//!
//! Locking: the pool has one lock for its own bookkeeping. Calls into the
//! hot cache and the scheduler are made outside that lock, so no cross-layer
//! lock is ever held simultaneously.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lightbox_cache::{HotImageCache, ImageHandle, PipelineConfig};
use lightbox_decode::RequestPriority;
use lightbox_scheduler::{JobId, JobPriority, JobScheduler, JobType};

use crate::pacer::{apply_step, NavigationOutcome};
use crate::sequence::SequenceWindow;

/// Result delivered to request waiters
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// The decoded artifact
    Ready(ImageHandle),
    /// Decode failed or was superseded
    Failed,
}

/// Handle resolving to a decoded artifact or failure
pub struct RequestHandle {
    rx: Receiver<RequestOutcome>,
}

impl RequestHandle {
    fn resolved(outcome: RequestOutcome) -> Self {
        let (tx, rx) = channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Block until the request resolves
    pub fn wait(&self) -> Option<ImageHandle> {
        match self.rx.recv() {
            Ok(RequestOutcome::Ready(image)) => Some(image),
            _ => None,
        }
    }

    /// Wait with a timeout. Outer `None` means the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Option<ImageHandle>> {
        match self.rx.recv_timeout(timeout) {
            Ok(RequestOutcome::Ready(image)) => Some(Some(image)),
            Ok(RequestOutcome::Failed) => Some(None),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Some(None),
        }
    }
}

/// Preload pool statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadStats {
    /// Decode jobs scheduled
    pub scheduled: u64,

    /// Requests attached to an existing in-flight decode
    pub attached: u64,

    /// Decodes completed and inserted into the hot cache
    pub completed: u64,

    /// Decodes that produced no artifact
    pub failed: u64,

    /// Results discarded because their context changed before completion
    pub stale_discards: u64,

    /// In-flight decodes cancelled outright
    pub cancelled: u64,

    /// Navigations applied to the window
    pub navigations_applied: u64,
}

struct InFlight {
    /// Scheduler job id; 0 until the submission completes
    job_id: JobId,
    generation: u64,
    index: usize,
    waiters: Vec<Sender<RequestOutcome>>,
}

struct PoolState {
    window: SequenceWindow,
    generation: u64,
    in_flight: HashMap<String, InFlight>,
    stats: PreloadStats,
}

/// A decode to schedule, produced under the pool lock and submitted outside it
struct PendingSubmit {
    key: String,
    index: usize,
    priority: JobPriority,
    target: Option<(u32, u32)>,
    generation: u64,
}

/// Sequence-aware preload pool with single-flight deduplication
pub struct BidirectionalPreloadPool {
    state: Mutex<PoolState>,
    hot: Arc<HotImageCache>,
    scheduler: Arc<JobScheduler>,
    retention_margin: usize,
}

impl BidirectionalPreloadPool {
    /// Create a pool over the given cache and scheduler
    pub fn new(
        config: &PipelineConfig,
        hot: Arc<HotImageCache>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            state: Mutex::new(PoolState {
                window: SequenceWindow::new(config.forward_window, config.backward_window),
                generation: 1,
                in_flight: HashMap::new(),
                stats: PreloadStats::default(),
            }),
            hot,
            scheduler,
            retention_margin: config.retention_margin,
        }
    }

    /// Replace the browsing sequence.
    ///
    /// Bumps the sequence generation, cancels every in-flight decode and
    /// fails their waiters: results for the old sequence are stale by
    /// definition.
    pub fn set_sequence(&self, keys: Vec<String>) {
        let (drained, generation) = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.window.set_keys(keys);
            let drained: Vec<InFlight> = state.in_flight.drain().map(|(_, v)| v).collect();
            state.stats.cancelled += drained.len() as u64;
            (drained, state.generation)
        };

        for entry in drained {
            if entry.job_id != 0 {
                self.scheduler.cancel_job(entry.job_id);
            }
            for waiter in entry.waiters {
                let _ = waiter.send(RequestOutcome::Failed);
            }
        }
        self.scheduler.cancel_stale_generations(generation);
    }

    /// Current sequence generation
    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    /// Current index in the sequence
    pub fn current_index(&self) -> usize {
        self.state.lock().unwrap().window.current()
    }

    /// Sequence length
    pub fn sequence_len(&self) -> usize {
        self.state.lock().unwrap().window.len()
    }

    /// Key at a sequence index
    pub fn key_at(&self, index: usize) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .window
            .key_at(index)
            .map(str::to_string)
    }

    /// Number of in-flight decodes
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Whether a key has an in-flight decode
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.state.lock().unwrap().in_flight.contains_key(key)
    }

    /// Pool statistics snapshot
    pub fn stats(&self) -> PreloadStats {
        self.state.lock().unwrap().stats
    }

    /// Request an artifact for a key.
    ///
    /// A hot-cache hit resolves immediately. A concurrent request for a key
    /// already in flight attaches to the existing decode rather than
    /// starting a second one (single-flight). Otherwise a decode job is
    /// scheduled.
    pub fn request(
        &self,
        key: &str,
        target: Option<(u32, u32)>,
        priority: RequestPriority,
    ) -> RequestHandle {
        // Hot check happens outside the pool lock
        if let Some(image) = self.hot.get(key) {
            return RequestHandle::resolved(RequestOutcome::Ready(image));
        }

        let (tx, rx) = channel();
        let pending = {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.in_flight.get_mut(key) {
                entry.waiters.push(tx);
                state.stats.attached += 1;
                None
            } else {
                let index = state
                    .window
                    .position_of(key)
                    .unwrap_or_else(|| state.window.current());
                let generation = state.generation;
                state.in_flight.insert(
                    key.to_string(),
                    InFlight {
                        job_id: 0,
                        generation,
                        index,
                        waiters: vec![tx],
                    },
                );
                state.stats.scheduled += 1;
                Some(PendingSubmit {
                    key: key.to_string(),
                    index,
                    priority: map_priority(priority),
                    target,
                    generation,
                })
            }
        };

        if let Some(pending) = pending {
            self.submit_pending(vec![pending]);
        }
        RequestHandle { rx }
    }

    /// Recompute the window after a navigation and reconcile scheduled work.
    ///
    /// Schedules decodes for prefetch indices that are neither cached nor
    /// in flight (submitted closest-first, so queue order realizes the
    /// distance tie-break), demotes hot entries that left the retention
    /// window, and — when `skip_intermediate` is set — cancels in-flight
    /// decodes for superseded indices instead of letting them complete.
    pub fn notify_navigation(
        &self,
        _from: usize,
        to: usize,
        widths: (usize, usize),
        bias: i8,
        skip_intermediate: bool,
    ) {
        let margin = self.retention_margin;

        // Phase 1: window update and candidate computation under the pool lock
        let (candidates, demote_keys, cancelled) = {
            let mut state = self.state.lock().unwrap();
            if state.window.is_empty() {
                return;
            }

            let (old_lo, old_hi) = state.window.retention_bounds(margin);
            state.window.set_widths(widths.0, widths.1);
            state.window.move_to(to);
            let to = state.window.current();
            let (new_lo, new_hi) = state.window.retention_bounds(margin);

            let demote_keys: Vec<String> = (old_lo..=old_hi)
                .filter(|i| *i < new_lo || *i > new_hi)
                .filter_map(|i| state.window.key_at(i).map(str::to_string))
                .collect();

            let mut candidates: Vec<(usize, String, JobPriority)> = Vec::new();
            if let Some(key) = state.window.key_at(to) {
                candidates.push((to, key.to_string(), JobPriority::Current));
            }
            for index in state.window.prefetch_indices(bias) {
                let distance = index.abs_diff(to);
                let priority = if distance <= 1 {
                    JobPriority::Adjacent
                } else {
                    JobPriority::Prefetch
                };
                if let Some(key) = state.window.key_at(index) {
                    candidates.push((index, key.to_string(), priority));
                }
            }

            let mut cancelled: Vec<InFlight> = Vec::new();
            if skip_intermediate {
                let stale_keys: Vec<String> = state
                    .in_flight
                    .iter()
                    .filter(|(_, e)| e.index < new_lo || e.index > new_hi)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in stale_keys {
                    if let Some(entry) = state.in_flight.remove(&key) {
                        cancelled.push(entry);
                    }
                }
                state.stats.cancelled += cancelled.len() as u64;
            }

            state.stats.navigations_applied += 1;
            (candidates, demote_keys, cancelled)
        };

        // Phase 2: cross-layer calls outside the pool lock
        for key in demote_keys {
            self.hot.demote(&key);
        }
        for entry in cancelled {
            if entry.job_id != 0 {
                self.scheduler.cancel_job(entry.job_id);
            }
            for waiter in entry.waiters {
                let _ = waiter.send(RequestOutcome::Failed);
            }
        }

        // Phase 3: drop candidates already in the hot cache
        let missing: Vec<(usize, String, JobPriority)> = candidates
            .into_iter()
            .filter(|(_, key, _)| !self.hot.contains(key))
            .collect();

        // Phase 4: reserve single-flight slots for keys not yet in flight
        let pending = {
            let mut state = self.state.lock().unwrap();
            let generation = state.generation;
            let mut pending = Vec::new();
            for (index, key, priority) in missing {
                if state.in_flight.contains_key(&key) {
                    continue;
                }
                state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        job_id: 0,
                        generation,
                        index,
                        waiters: Vec::new(),
                    },
                );
                state.stats.scheduled += 1;
                pending.push(PendingSubmit {
                    key,
                    index,
                    priority,
                    target: None,
                    generation,
                });
            }
            pending
        };

        self.submit_pending(pending);
    }

    /// Apply a coalesced net step from the debounce timer.
    ///
    /// A step overflowing the sequence boundary becomes an
    /// advance-to-adjacent-sequence instruction instead of a clamped move.
    pub fn apply_net_step(
        &self,
        net: i64,
        widths: (usize, usize),
        bias: i8,
        skip_intermediate: bool,
    ) -> NavigationOutcome {
        let (from, len) = {
            let state = self.state.lock().unwrap();
            (state.window.current(), state.window.len())
        };

        let outcome = apply_step(from, net, len);
        if let NavigationOutcome::Move { from, to } = outcome {
            self.notify_navigation(from, to, widths, bias, skip_intermediate);
        }
        outcome
    }

    /// Deliver a decode result for a key.
    ///
    /// The result is discarded (never inserted into the hot cache) when the
    /// scheduling context is gone: the in-flight entry was cancelled, the
    /// sequence generation moved on, or the index left the retention
    /// window. Returns `true` when the artifact was inserted.
    pub fn complete_decode(
        &self,
        key: &str,
        generation: u64,
        image: Option<ImageHandle>,
    ) -> bool {
        enum Disposition {
            Insert(ImageHandle),
            Failed,
            Stale,
        }

        let (waiters, disposition) = {
            let mut state = self.state.lock().unwrap();

            match state.in_flight.remove(key) {
                None => {
                    // Entry already cancelled: the result is stale.
                    state.stats.stale_discards += 1;
                    (Vec::new(), Disposition::Stale)
                }
                Some(entry) if entry.generation != generation => {
                    // The slot belongs to a newer scheduling of this key;
                    // leave it in place and discard the old result.
                    state.in_flight.insert(key.to_string(), entry);
                    state.stats.stale_discards += 1;
                    (Vec::new(), Disposition::Stale)
                }
                Some(entry) => {
                    let current_generation = state.generation;
                    let in_retention =
                        state.window.in_retention(entry.index, self.retention_margin);

                    if entry.generation != current_generation || !in_retention {
                        state.stats.stale_discards += 1;
                        (entry.waiters, Disposition::Stale)
                    } else {
                        match image {
                            Some(image) => {
                                state.stats.completed += 1;
                                (entry.waiters, Disposition::Insert(image))
                            }
                            None => {
                                state.stats.failed += 1;
                                (entry.waiters, Disposition::Failed)
                            }
                        }
                    }
                }
            }
        };

        match disposition {
            Disposition::Insert(image) => {
                self.hot.put(key, Arc::clone(&image));
                for waiter in waiters {
                    let _ = waiter.send(RequestOutcome::Ready(Arc::clone(&image)));
                }
                true
            }
            Disposition::Failed | Disposition::Stale => {
                for waiter in waiters {
                    let _ = waiter.send(RequestOutcome::Failed);
                }
                false
            }
        }
    }

    /// Cancel any in-flight decode for a key (used by invalidation)
    pub fn cancel_key(&self, key: &str) {
        let entry = {
            let mut state = self.state.lock().unwrap();
            let entry = state.in_flight.remove(key);
            if entry.is_some() {
                state.stats.cancelled += 1;
            }
            entry
        };

        if let Some(entry) = entry {
            if entry.job_id != 0 {
                self.scheduler.cancel_job(entry.job_id);
            }
            for waiter in entry.waiters {
                let _ = waiter.send(RequestOutcome::Failed);
            }
        }
        self.scheduler.cancel_key_jobs(key);
    }

    /// Submit reserved decodes to the scheduler and record their job ids.
    fn submit_pending(&self, pending: Vec<PendingSubmit>) {
        for submit in pending {
            let (job_id, _token) = self.scheduler.submit(
                submit.priority,
                JobType::DecodeImage {
                    key: submit.key.clone(),
                    index: submit.index,
                    generation: submit.generation,
                    target: submit.target,
                },
            );

            let mut state = self.state.lock().unwrap();
            match state.in_flight.get_mut(&submit.key) {
                Some(entry) if entry.generation == submit.generation => {
                    entry.job_id = job_id;
                }
                _ => {
                    // The slot vanished (sequence reset) before submission
                    // landed; the job must not run.
                    drop(state);
                    self.scheduler.cancel_job(job_id);
                }
            }
        }
    }
}

fn map_priority(priority: RequestPriority) -> JobPriority {
    match priority {
        RequestPriority::Current => JobPriority::Current,
        RequestPriority::Adjacent => JobPriority::Adjacent,
        RequestPriority::Prefetch => JobPriority::Prefetch,
    }
}
