//! Lightbox core library
//!
//! The image-browsing engine: a sequence-aware bidirectional preload pool
//! over the cache layers, a navigation pacer driving debounce and prefetch
//! width, and the `ImageEngine` coordinator exposing the public API.

pub mod engine;
pub mod pacer;
pub mod preload;
pub mod sequence;

pub use engine::{CacheStatsReport, ImageEngine};
pub use pacer::{apply_step, NavigationOutcome, NavigationPacer};
pub use preload::{BidirectionalPreloadPool, PreloadStats, RequestHandle, RequestOutcome};
pub use sequence::SequenceWindow;
