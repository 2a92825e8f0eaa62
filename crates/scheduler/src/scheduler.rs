//! Job scheduler
//!
//! High-level coordination of job submission, priority-ordered execution
//! and cancellation. Workers pull jobs via `next_job` and report back with
//! `complete_job`.

use std::sync::Mutex;

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, JobType, PriorityQueue};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Total jobs cancelled
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed + self.jobs_cancelled)
    }
}

/// Priority job scheduler with cooperative cancellation
///
/// # Example
///
/// ```
/// use lightbox_scheduler::{JobScheduler, JobPriority, JobType};
///
/// let scheduler = JobScheduler::new();
///
/// let (job_id, token) = scheduler.submit(
///     JobPriority::Current,
///     JobType::DecodeImage {
///         key: "photos/a.jpg".into(),
///         index: 0,
///         generation: 1,
///         target: Some((1200, 800)),
///     },
/// );
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(!token.is_cancelled());
///     // ... decode, checking the token between steps ...
///     scheduler.complete_job(job.id);
/// }
/// ```
pub struct JobScheduler {
    queue: PriorityQueue,
    state: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl JobScheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            state: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Submit a job, returning its ID and cancellation token
    pub fn submit(&self, priority: JobPriority, job_type: JobType) -> (JobId, CancellationToken) {
        let job_id = self.queue.push(priority, job_type);
        let token = self.cancellation.register(job_id);

        let mut state = self.state.lock().unwrap();
        state.jobs_submitted += 1;

        (job_id, token)
    }

    /// Pull the next job to execute.
    ///
    /// The job leaves the queue but its cancellation token stays registered
    /// until `complete_job` or `cancel_job`.
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    /// Mark a job completed and release its token
    pub fn complete_job(&self, job_id: JobId) {
        {
            let mut state = self.state.lock().unwrap();
            state.jobs_completed += 1;
        }
        self.cancellation.unregister(job_id);
    }

    /// Cancel one job by ID.
    ///
    /// Queued jobs are removed outright; a running job has its token
    /// cancelled and is expected to bail out cooperatively. Returns `true`
    /// if the job was found in either state.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed > 0 {
            let mut state = self.state.lock().unwrap();
            state.jobs_cancelled += removed as u64;
            drop(state);
            self.cancellation.unregister(job_id);
            true
        } else {
            token_cancelled
        }
    }

    /// Cancel all queued jobs matching a predicate, returning the count
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let to_cancel: Vec<JobId> = self
            .queue
            .jobs()
            .into_iter()
            .filter(|job| predicate(job))
            .map(|job| job.id)
            .collect();

        self.cancellation.cancel_many(&to_cancel);
        let removed = self.queue.remove_if(predicate);

        if removed > 0 {
            let mut state = self.state.lock().unwrap();
            state.jobs_cancelled += removed as u64;
            drop(state);

            for job_id in to_cancel {
                self.cancellation.unregister(job_id);
            }
        }

        removed
    }

    /// Cancel every queued decode for a resource key
    pub fn cancel_key_jobs(&self, key: &str) -> usize {
        self.cancel_jobs_if(|job| job.job_type.key() == Some(key))
    }

    /// Cancel queued decodes stamped with an outdated sequence generation
    pub fn cancel_stale_generations(&self, current_generation: u64) -> usize {
        self.cancel_jobs_if(|job| match &job.job_type {
            JobType::DecodeImage { generation, .. } => *generation < current_generation,
            _ => false,
        })
    }

    /// Number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Whether any jobs are queued
    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cancel everything in the queue
    pub fn clear(&self) {
        let cancelled = self.queue.len();
        self.cancellation.cancel_all();
        self.queue.clear();

        if cancelled > 0 {
            let mut state = self.state.lock().unwrap();
            state.jobs_cancelled += cancelled as u64;
            drop(state);
            self.cancellation.clear();
        }
    }

    /// Scheduler statistics snapshot
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = *self.state.lock().unwrap();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Token for a job, if it is still registered
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
