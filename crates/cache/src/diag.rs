//! Rate limiting for repeated failure diagnostics
//!
//! When a remote share becomes unreachable every navigation step produces
//! the same I/O failure; logging each one floods the log. The suppressor
//! lets the first occurrences of a message class through and counts the
//! rest silently.

use std::collections::HashMap;
use std::sync::Mutex;

/// Log rate limiter keyed by message class.
///
/// # Example
///
/// ```
/// use lightbox_cache::diag::LogSuppressor;
///
/// let suppressor = LogSuppressor::new(1);
/// assert!(suppressor.should_log("decode-failed:/a.jpg"));
/// assert!(!suppressor.should_log("decode-failed:/a.jpg"));
/// assert_eq!(suppressor.suppressed_total(), 1);
/// ```
pub struct LogSuppressor {
    counts: Mutex<HashMap<String, u64>>,
    suppress_after: u64,
}

impl LogSuppressor {
    /// Create a suppressor that logs the first `suppress_after` occurrences
    /// of each message class.
    pub fn new(suppress_after: u64) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            suppress_after: suppress_after.max(1),
        }
    }

    /// Record an occurrence; returns whether it should be logged.
    pub fn should_log(&self, class: &str) -> bool {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(class.to_string()).or_insert(0);
        *count += 1;
        *count <= self.suppress_after
    }

    /// Total occurrences swallowed across all classes
    pub fn suppressed_total(&self) -> u64 {
        let counts = self.counts.lock().unwrap();
        counts
            .values()
            .map(|&c| c.saturating_sub(self.suppress_after))
            .sum()
    }

    /// Forget a message class (e.g. after the failure clears)
    pub fn reset(&self, class: &str) {
        let mut counts = self.counts.lock().unwrap();
        counts.remove(class);
    }
}

impl Default for LogSuppressor {
    fn default() -> Self {
        Self::new(1)
    }
}
