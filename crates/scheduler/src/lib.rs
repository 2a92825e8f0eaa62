//! Lightbox scheduler library
//!
//! Priority-based background job scheduling for the image pipeline: decode
//! and fetch jobs are ordered by priority (current image, adjacent
//! neighbors, prefetch window, maintenance) with FIFO ordering inside each
//! level, executed by a bounded worker pool, and cancelled cooperatively
//! when navigation moves on.

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, JobType};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{default_pool_size, JobExecutor, WorkerPool, WorkerPoolConfig};
