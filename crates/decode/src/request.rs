//! Decode request classification
//!
//! Requests are categorized by pixel megacount first, then file size
//! (first match wins). The category drives the overscale factor applied to
//! the requested target dimensions and the memory-priority flag.

use std::path::PathBuf;

use lightbox_cache::{ImageHandle, PipelineConfig};

use crate::strategy::DecodeStrategyKind;

/// Priority of an image request relative to the browsing position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    /// Speculative prefetch inside the window
    Prefetch,
    /// Immediate neighbor of the current image
    Adjacent,
    /// The image under the cursor
    Current,
}

/// Derived decode category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeCategory {
    /// >= 150 megapixels by default
    UltraHighPixel,
    /// 50–150 megapixels by default
    HighPixel,
    /// Large source file regardless of pixel count
    LargeFile,
    /// Everything else
    Normal,
}

impl DecodeCategory {
    /// Category name for logs and stats
    pub fn name(&self) -> &'static str {
        match self {
            DecodeCategory::UltraHighPixel => "ultra_high_pixel",
            DecodeCategory::HighPixel => "high_pixel",
            DecodeCategory::LargeFile => "large_file",
            DecodeCategory::Normal => "normal",
        }
    }

    /// Whether this category's decodes should be prioritized for memory
    pub fn memory_priority(&self) -> bool {
        matches!(
            self,
            DecodeCategory::UltraHighPixel | DecodeCategory::HighPixel
        )
    }
}

/// Classify a request from its pixel count and file size.
///
/// Pixel thresholds are checked before the file-size threshold; the first
/// match wins. An unknown pixel count (probe failure) falls through to the
/// file-size check.
pub fn classify(pixels: Option<u64>, file_size: u64, config: &PipelineConfig) -> DecodeCategory {
    if let Some(px) = pixels {
        if px >= config.ultra_pixel_threshold {
            return DecodeCategory::UltraHighPixel;
        }
        if px >= config.high_pixel_threshold {
            return DecodeCategory::HighPixel;
        }
    }
    if file_size >= config.large_file_threshold {
        return DecodeCategory::LargeFile;
    }
    DecodeCategory::Normal
}

/// Overscale factor for a category: the multiplier applied to the requested
/// target dimension to leave quality headroom.
pub fn overscale_for(category: DecodeCategory, config: &PipelineConfig) -> f64 {
    match category {
        DecodeCategory::UltraHighPixel => config.overscale_ultra,
        DecodeCategory::HighPixel => config.overscale_high,
        DecodeCategory::LargeFile => config.overscale_large,
        DecodeCategory::Normal => config.overscale_normal,
    }
}

/// Apply an overscale factor to requested target dimensions
pub fn apply_overscale(target: Option<(u32, u32)>, factor: f64) -> Option<(u32, u32)> {
    target.map(|(w, h)| {
        (
            ((w as f64 * factor).round() as u32).max(1),
            ((h as f64 * factor).round() as u32).max(1),
        )
    })
}

/// A decode request flowing through the pipeline
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    /// Path of the resource to decode
    pub path: PathBuf,

    /// Requested display dimensions, if any
    pub target: Option<(u32, u32)>,

    /// Priority relative to the browsing position
    pub priority: RequestPriority,
}

impl DecodeRequest {
    /// Create a request for a path
    pub fn new(path: impl Into<PathBuf>, target: Option<(u32, u32)>, priority: RequestPriority) -> Self {
        Self {
            path: path.into(),
            target,
            priority,
        }
    }
}

/// Outcome of a decode attempt
#[derive(Debug, Clone)]
pub struct DecodeResult {
    /// Decoded artifact, or `None` when every strategy failed
    pub image: Option<ImageHandle>,

    /// Strategy that produced the artifact
    pub strategy: Option<DecodeStrategyKind>,

    /// Category the request was classified into
    pub category: DecodeCategory,

    /// Wall-clock decode time in milliseconds
    pub elapsed_ms: u64,
}

impl DecodeResult {
    /// Whether the decode produced an artifact
    pub fn success(&self) -> bool {
        self.image.is_some()
    }
}
