//! Bounded worker pool for background decode and fetch work
//!
//! Workers run on their own threads, pulling jobs from the scheduler in
//! priority order and executing them through a caller-supplied callback.
//! The navigation-handling path never blocks on I/O: all file, mapped and
//! network reads happen here.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{CancellationToken, Job, JobScheduler};

/// Callback invoked by workers for each job.
///
/// The callback should check `token.is_cancelled()` between expensive steps
/// and return early when the job has been superseded.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Default worker count: `clamp(cpu_count * 4, 1, 64)`.
///
/// Decode work is a mix of CPU and blocking I/O, so the pool is
/// oversubscribed relative to core count.
pub fn default_pool_size() -> usize {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    (cpus * 4).clamp(1, 64)
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn
    pub num_workers: usize,

    /// Maximum time a worker waits for a job before checking shutdown
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_pool_size(),
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with an explicit worker count
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker pool executing scheduler jobs in the background
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lightbox_scheduler::{
///     CancellationToken, Job, JobPriority, JobScheduler, JobType, WorkerPool, WorkerPoolConfig,
/// };
///
/// let scheduler = Arc::new(JobScheduler::new());
///
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     if let JobType::DecodeImage { key, .. } = &job.job_type {
///         // ... decode `key` ...
///         let _ = key;
///     }
/// });
///
/// let pool = WorkerPool::new(Arc::clone(&scheduler), executor, WorkerPoolConfig::new(2));
/// scheduler.submit(JobPriority::Current, JobType::SweepExpired);
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create and start a worker pool
    pub fn new(scheduler: Arc<JobScheduler>, executor: JobExecutor, config: WorkerPoolConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            workers.push(Worker::new(
                id,
                Arc::clone(&scheduler),
                Arc::clone(&executor),
                Arc::clone(&shutdown),
                config.poll_interval,
            ));
        }

        Self { workers, shutdown }
    }

    /// Number of worker threads
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut down gracefully, waiting for workers to finish their current jobs
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in self.workers {
            worker.join();
        }
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(
        id: usize,
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(format!("lightbox-decode-{id}"))
            .spawn(move || {
                Self::run(scheduler, executor, shutdown, poll_interval);
            })
            .expect("failed to spawn worker thread");

        Self {
            thread: Some(thread),
        }
    }

    fn run(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            match scheduler.next_job() {
                Some(job) => {
                    let token = scheduler
                        .get_cancellation_token(job.id)
                        .unwrap_or_default();

                    // Skip work that was cancelled while queued
                    if !token.is_cancelled() {
                        executor(&job, &token);
                    }

                    scheduler.complete_job(job.id);
                }
                None => {
                    thread::sleep(poll_interval);
                }
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobPriority, JobType};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn decode(key: &str, index: usize) -> JobType {
        JobType::DecodeImage {
            key: key.to_string(),
            index,
            generation: 0,
            target: None,
        }
    }

    #[test]
    fn test_default_pool_size_bounds() {
        let size = default_pool_size();
        assert!(size >= 1);
        assert!(size <= 64);
    }

    #[test]
    fn test_pool_creation_and_shutdown() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor = Arc::new(|_job: &Job, _token: &CancellationToken| {});

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(2));
        assert_eq!(pool.num_workers(), 2);
        assert!(!pool.is_shutting_down());
        pool.shutdown();
    }

    #[test]
    fn test_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = Arc::clone(&executed);

        let executor = Arc::new(move |_job: &Job, _token: &CancellationToken| {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        });

        let config = WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(Arc::clone(&scheduler), executor, config);

        for i in 0..5 {
            scheduler.submit(JobPriority::Prefetch, decode(&format!("{i}.jpg"), i));
        }

        // Wait for the queue to drain
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while executed.load(Ordering::SeqCst) < 5 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(executed.load(Ordering::SeqCst), 5);
        pool.shutdown();
    }

    #[test]
    fn test_pool_respects_cancellation() {
        let scheduler = Arc::new(JobScheduler::new());
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_clone = Arc::clone(&completed);

        let executor = Arc::new(move |_job: &Job, token: &CancellationToken| {
            for _ in 0..20 {
                if token.is_cancelled() {
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
            completed_clone.fetch_add(1, Ordering::SeqCst);
        });

        let config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(Arc::clone(&scheduler), executor, config);

        let mut ids = Vec::new();
        for i in 0..3 {
            let (id, _) = scheduler.submit(JobPriority::Current, decode(&format!("{i}.jpg"), i));
            ids.push(id);
        }

        // Give the first job time to start, then cancel the rest
        thread::sleep(Duration::from_millis(20));
        for id in ids.iter().skip(1) {
            scheduler.cancel_job(*id);
        }

        thread::sleep(Duration::from_millis(300));
        assert!(completed.load(Ordering::SeqCst) <= 1);

        pool.shutdown();
    }

    #[test]
    fn test_single_worker_preserves_priority_order() {
        let scheduler = Arc::new(JobScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);

        let executor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            if let JobType::DecodeImage { index, .. } = &job.job_type {
                order_clone.lock().unwrap().push(*index);
            }
            thread::sleep(Duration::from_millis(5));
        });

        let config = WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(5));
        let pool = WorkerPool::new(Arc::clone(&scheduler), executor, config);

        scheduler.submit(JobPriority::Prefetch, decode("far.jpg", 8));
        scheduler.submit(JobPriority::Current, decode("here.jpg", 5));
        scheduler.submit(JobPriority::Adjacent, decode("next.jpg", 6));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while order.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown();

        // One of the three may have been picked up before the higher
        // priority submissions arrived; the remaining two must be ordered.
        let order = order.lock().unwrap();
        assert_eq!(order.len(), 3);
        let tail: Vec<_> = order
            .iter()
            .filter(|&&i| i == 5 || i == 6)
            .copied()
            .collect();
        assert_eq!(tail, vec![5, 6]);
    }
}
