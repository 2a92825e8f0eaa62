//! Cooperative cancellation for background jobs
//!
//! A decode that outlives its usefulness (the user navigated away, the
//! sequence was replaced) is cancelled cooperatively: the worker checks its
//! token between expensive steps and bails out early.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::JobId;

/// Cancellation token shared between the scheduler and a running worker.
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use lightbox_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token. Idempotent; observed by all clones.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Registry associating job IDs with cancellation tokens
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job; returns its token
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(job_id, token.clone());
        token
    }

    /// Cancel a job by ID. Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let tokens = self.tokens.lock().unwrap();
        match tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several jobs, returning how many were found
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.tokens.lock().unwrap();
        let mut cancelled = 0;
        for job_id in job_ids {
            if let Some(token) = tokens.get(job_id) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel every registered job, returning the count
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Drop a job's token (on completion or removal from the queue)
    pub fn unregister(&self, job_id: JobId) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.remove(&job_id).is_some()
    }

    /// Token for a job, if registered
    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        let tokens = self.tokens.lock().unwrap();
        tokens.get(&job_id).cloned()
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        tokens.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        let tokens = self.tokens.lock().unwrap();
        tokens.is_empty()
    }

    /// Remove all tokens without cancelling them
    pub fn clear(&self) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.clear();
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cancel() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        // Idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_token_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_registry_register_cancel() {
        let registry = CancellationRegistry::new();
        let token = registry.register(1);

        assert!(!token.is_cancelled());
        assert!(registry.cancel(1));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(99));
    }

    #[test]
    fn test_registry_cancel_many() {
        let registry = CancellationRegistry::new();
        let t1 = registry.register(1);
        let t2 = registry.register(2);
        let t3 = registry.register(3);

        assert_eq!(registry.cancel_many(&[1, 2, 99]), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(!t3.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();
        let t1 = registry.register(1);
        let t2 = registry.register(2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[test]
    fn test_registry_unregister() {
        let registry = CancellationRegistry::new();
        registry.register(1);

        assert!(registry.unregister(1));
        assert!(!registry.unregister(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_get() {
        let registry = CancellationRegistry::new();
        let original = registry.register(7);

        let fetched = registry.get(7).unwrap();
        original.cancel();
        assert!(fetched.is_cancelled());
        assert!(registry.get(99).is_none());
    }

    #[test]
    fn test_registry_clear_leaves_tokens_alone() {
        let registry = CancellationRegistry::new();
        let token = registry.register(1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!token.is_cancelled());
    }
}
