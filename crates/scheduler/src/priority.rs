//! Priority-based job queue
//!
//! Background work is ordered by priority level with FIFO ordering inside a
//! level. The preload pool submits decode jobs in ascending distance from
//! the current index, so FIFO-within-priority doubles as the distance
//! tie-break.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Job priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Housekeeping (TTL sweeps, index maintenance; runs when idle)
    Maintenance = 0,

    /// Prefetch-window decodes beyond the immediate neighbors
    Prefetch = 1,

    /// Immediate neighbors of the current image
    Adjacent = 2,

    /// The image under the cursor (must decode immediately)
    Current = 3,
}

/// Unique job identifier
pub type JobId = u64;

/// Job type enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    /// Decode an image for a sequence position
    DecodeImage {
        key: String,
        index: usize,
        generation: u64,
        target: Option<(u32, u32)>,
    },

    /// Copy a remote file into the local disk cache
    FetchRemote { path: PathBuf },

    /// Sweep expired entries out of the remote cache
    SweepExpired,
}

impl JobType {
    /// Resource key this job concerns, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            JobType::DecodeImage { key, .. } => Some(key),
            JobType::FetchRemote { path } => path.to_str(),
            JobType::SweepExpired => None,
        }
    }
}

/// A scheduled job with priority
///
/// Jobs are ordered by priority (higher first), then by insertion order
/// (earlier first) for FIFO ordering within a priority level.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Job type and parameters
    pub job_type: JobType,

    /// Insertion order (FIFO within the same priority)
    insertion_order: u64,
}

impl Job {
    fn new(id: JobId, priority: JobPriority, job_type: JobType, insertion_order: u64) -> Self {
        Self {
            id,
            priority,
            job_type,
            insertion_order,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: reverse insertion order so earlier
            // submissions win within a priority level.
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe priority queue for jobs
pub struct PriorityQueue {
    state: Arc<Mutex<QueueState>>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    /// Create a new empty priority queue
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            })),
        }
    }

    /// Push a job onto the queue, returning its assigned ID
    pub fn push(&self, priority: JobPriority, job_type: JobType) -> JobId {
        let mut state = self.state.lock().unwrap();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state
            .heap
            .push(Job::new(job_id, priority, job_type, insertion_order));
        job_id
    }

    /// Pop the highest priority job, or `None` if the queue is empty
    pub fn pop(&self) -> Option<Job> {
        let mut state = self.state.lock().unwrap();
        state.heap.pop()
    }

    /// Peek at the highest priority job without removing it
    pub fn peek(&self) -> Option<Job> {
        let state = self.state.lock().unwrap();
        state.heap.peek().cloned()
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.heap.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.heap.is_empty()
    }

    /// Clear all queued jobs
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.heap.clear();
    }

    /// Remove all jobs matching a predicate, returning how many were removed
    pub fn remove_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let original_len = state.heap.len();

        let mut remaining = Vec::new();
        while let Some(job) = state.heap.pop() {
            if !predicate(&job) {
                remaining.push(job);
            }
        }
        state.heap = remaining.into_iter().collect();

        original_len - state.heap.len()
    }

    /// Snapshot of all queued jobs, in arbitrary order
    pub fn jobs(&self) -> Vec<Job> {
        let state = self.state.lock().unwrap();
        state.heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_job(key: &str, index: usize) -> JobType {
        JobType::DecodeImage {
            key: key.to_string(),
            index,
            generation: 0,
            target: None,
        }
    }

    #[test]
    fn test_priority_levels_ordered() {
        assert!(JobPriority::Current > JobPriority::Adjacent);
        assert!(JobPriority::Adjacent > JobPriority::Prefetch);
        assert!(JobPriority::Prefetch > JobPriority::Maintenance);
    }

    #[test]
    fn test_push_pop_basic() {
        let queue = PriorityQueue::new();
        assert!(queue.is_empty());

        let id = queue.push(JobPriority::Current, decode_job("a.jpg", 0));
        assert_eq!(queue.len(), 1);

        let job = queue.pop().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.priority, JobPriority::Current);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_ordering() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::Maintenance, JobType::SweepExpired);
        queue.push(JobPriority::Prefetch, decode_job("far.jpg", 8));
        queue.push(JobPriority::Current, decode_job("here.jpg", 5));
        queue.push(JobPriority::Adjacent, decode_job("next.jpg", 6));

        assert_eq!(queue.pop().unwrap().priority, JobPriority::Current);
        assert_eq!(queue.pop().unwrap().priority, JobPriority::Adjacent);
        assert_eq!(queue.pop().unwrap().priority, JobPriority::Prefetch);
        assert_eq!(queue.pop().unwrap().priority, JobPriority::Maintenance);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority_is_distance_order() {
        let queue = PriorityQueue::new();

        // The preload pool submits prefetch jobs closest-first; the queue
        // must hand them back in the same order.
        let near = queue.push(JobPriority::Prefetch, decode_job("d1.jpg", 6));
        let mid = queue.push(JobPriority::Prefetch, decode_job("d2.jpg", 7));
        let far = queue.push(JobPriority::Prefetch, decode_job("d3.jpg", 8));

        assert_eq!(queue.pop().unwrap().id, near);
        assert_eq!(queue.pop().unwrap().id, mid);
        assert_eq!(queue.pop().unwrap().id, far);
    }

    #[test]
    fn test_peek_leaves_queue_intact() {
        let queue = PriorityQueue::new();
        let id = queue.push(JobPriority::Current, decode_job("a.jpg", 0));
        queue.push(JobPriority::Maintenance, JobType::SweepExpired);

        assert_eq!(queue.peek().unwrap().id, id);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_if() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::Prefetch, decode_job("a.jpg", 1));
        queue.push(JobPriority::Prefetch, decode_job("b.jpg", 2));
        queue.push(JobPriority::Maintenance, JobType::SweepExpired);

        let removed = queue.remove_if(|job| {
            matches!(&job.job_type, JobType::DecodeImage { index, .. } if *index >= 2)
        });
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_job_type_key() {
        assert_eq!(decode_job("a.jpg", 1).key(), Some("a.jpg"));
        assert_eq!(
            JobType::FetchRemote {
                path: PathBuf::from("/v/s/a.jpg")
            }
            .key(),
            Some("/v/s/a.jpg")
        );
        assert_eq!(JobType::SweepExpired.key(), None);
    }

    #[test]
    fn test_mixed_priority_fifo() {
        let queue = PriorityQueue::new();

        let c1 = queue.push(JobPriority::Current, decode_job("c1.jpg", 5));
        let p1 = queue.push(JobPriority::Prefetch, decode_job("p1.jpg", 7));
        let c2 = queue.push(JobPriority::Current, decode_job("c2.jpg", 5));
        let p2 = queue.push(JobPriority::Prefetch, decode_job("p2.jpg", 8));

        assert_eq!(queue.pop().unwrap().id, c1);
        assert_eq!(queue.pop().unwrap().id, c2);
        assert_eq!(queue.pop().unwrap().id, p1);
        assert_eq!(queue.pop().unwrap().id, p2);
    }
}
