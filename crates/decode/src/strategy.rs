//! Decode strategy selection and fallback
//!
//! Each decode request is routed to one of three strategies keyed by file
//! size (or an explicit override): fast direct decode for small files,
//! accelerated thumbnail decode through the native decoder for mid-size
//! files, and memory-mapped decode for very large files. A strategy that
//! produces no artifact falls back through the fixed chain
//! fast → accelerated → memory-mapped until one succeeds or all fail.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use image::imageops::FilterType;
use image::GenericImageView;
use memmap2::Mmap;

use lightbox_cache::{
    DecodedImage, FileSystemReader, LogSuppressor, MemoryBudgetPool, PipelineConfig,
};

use crate::decoder::{DecodeOptions, NativeImageDecoder};
use crate::request::{
    apply_overscale, classify, overscale_for, DecodeCategory, DecodeRequest, DecodeResult,
};

/// Available decode strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategyKind {
    /// Read the whole file into memory and decode from bytes (small files)
    FastDirect,

    /// Thumbnail decode through the native decoder (mid-size files)
    Accelerated,

    /// Windowed decode over a memory-mapped file (very large files)
    MemoryMapped,
}

/// Fixed fallback order tried when a strategy returns no artifact
pub const FALLBACK_CHAIN: [DecodeStrategyKind; 3] = [
    DecodeStrategyKind::FastDirect,
    DecodeStrategyKind::Accelerated,
    DecodeStrategyKind::MemoryMapped,
];

impl DecodeStrategyKind {
    /// Strategy name for configuration and logs
    pub fn name(&self) -> &'static str {
        match self {
            DecodeStrategyKind::FastDirect => "fast",
            DecodeStrategyKind::Accelerated => "accelerated",
            DecodeStrategyKind::MemoryMapped => "mmap",
        }
    }

    /// Parse a strategy name from configuration
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(DecodeStrategyKind::FastDirect),
            "accelerated" => Some(DecodeStrategyKind::Accelerated),
            "mmap" | "memory_mapped" => Some(DecodeStrategyKind::MemoryMapped),
            _ => None,
        }
    }
}

/// Strategy selector and dispatcher
///
/// Strategies are enum-dispatched behind the single `can_handle`/`load`
/// surface; the factory picks the initial strategy from the file size and
/// the configured override.
pub struct StrategySelector {
    decoder: Arc<dyn NativeImageDecoder>,
    fs: Arc<dyn FileSystemReader>,
    pool: Arc<MemoryBudgetPool>,
    suppressor: Arc<LogSuppressor>,
    config: PipelineConfig,
    override_kind: Option<DecodeStrategyKind>,
}

impl StrategySelector {
    /// Create a selector from pipeline configuration
    pub fn new(
        config: &PipelineConfig,
        decoder: Arc<dyn NativeImageDecoder>,
        fs_reader: Arc<dyn FileSystemReader>,
        pool: Arc<MemoryBudgetPool>,
        suppressor: Arc<LogSuppressor>,
    ) -> Self {
        let override_kind = config
            .strategy_override
            .as_deref()
            .and_then(DecodeStrategyKind::from_name);
        Self {
            decoder,
            fs: fs_reader,
            pool,
            suppressor,
            config: config.clone(),
            override_kind,
        }
    }

    /// The decoder used by the accelerated strategy
    pub fn decoder(&self) -> &Arc<dyn NativeImageDecoder> {
        &self.decoder
    }

    /// Classify a request: derived category plus probed dimensions and size
    pub fn classify_path(&self, path: &Path) -> (DecodeCategory, Option<(u32, u32)>, u64) {
        let dims = self.decoder.probe(path);
        let pixels = dims.map(|(w, h)| w as u64 * h as u64);
        let file_size = self.fs.size_of(path).unwrap_or(0);
        (classify(pixels, file_size, &self.config), dims, file_size)
    }

    /// Pick the initial strategy for a file
    pub fn pick_strategy(&self, file_size: u64) -> DecodeStrategyKind {
        if let Some(kind) = self.override_kind {
            return kind;
        }
        if file_size >= self.config.mmap_threshold {
            DecodeStrategyKind::MemoryMapped
        } else if file_size >= self.config.accelerated_min_bytes {
            DecodeStrategyKind::Accelerated
        } else {
            DecodeStrategyKind::FastDirect
        }
    }

    /// Whether a strategy is worth attempting for this file
    pub fn can_handle(&self, kind: DecodeStrategyKind, file_size: u64) -> bool {
        match kind {
            DecodeStrategyKind::FastDirect => true,
            DecodeStrategyKind::Accelerated => true,
            // An empty file cannot be mapped
            DecodeStrategyKind::MemoryMapped => file_size > 0,
        }
    }

    /// Decode a request, applying classification, overscale, strategy
    /// selection and the fallback chain.
    pub fn decode(&self, path: &Path, target: Option<(u32, u32)>) -> DecodeResult {
        let start = Instant::now();
        let (category, _dims, file_size) = self.classify_path(path);
        let scaled = apply_overscale(target, overscale_for(category, &self.config));
        let options = DecodeOptions {
            prefer_thumbnail: true,
            memory_priority: category.memory_priority(),
        };

        let primary = self.pick_strategy(file_size);
        let mut attempted = Vec::with_capacity(4);
        attempted.push(primary);

        let mut outcome = None;
        if self.can_handle(primary, file_size) {
            outcome = self.load(primary, path, scaled, &options).map(|i| (primary, i));
        }

        if outcome.is_none() {
            for kind in FALLBACK_CHAIN {
                if attempted.contains(&kind) || !self.can_handle(kind, file_size) {
                    continue;
                }
                attempted.push(kind);
                if let Some(image) = self.load(kind, path, scaled, &options) {
                    outcome = Some((kind, image));
                    break;
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Some((kind, image)) => DecodeResult {
                image: Some(Arc::new(image)),
                strategy: Some(kind),
                category,
                elapsed_ms,
            },
            None => {
                if self
                    .suppressor
                    .should_log(&format!("decode-failed:{}", path.display()))
                {
                    log::warn!(
                        "decode failed for {} (category {}, {} strategies tried)",
                        path.display(),
                        category.name(),
                        attempted.len()
                    );
                }
                DecodeResult {
                    image: None,
                    strategy: None,
                    category,
                    elapsed_ms,
                }
            }
        }
    }

    /// Decode a request structure (path, target and priority)
    pub fn decode_request(&self, request: &DecodeRequest) -> DecodeResult {
        self.decode(&request.path, request.target)
    }

    /// Run one strategy
    pub fn load(
        &self,
        kind: DecodeStrategyKind,
        path: &Path,
        target: Option<(u32, u32)>,
        options: &DecodeOptions,
    ) -> Option<DecodedImage> {
        match kind {
            DecodeStrategyKind::FastDirect => self.load_direct(path, target),
            DecodeStrategyKind::Accelerated => self.decoder.decode(path, target, options),
            DecodeStrategyKind::MemoryMapped => self.load_mapped(path, target),
        }
    }

    /// Read the file into a pooled buffer and decode from bytes
    fn load_direct(&self, path: &Path, target: Option<(u32, u32)>) -> Option<DecodedImage> {
        let file_size = self.fs.size_of(path).ok()?;

        // Scratch buffer from the budget pool; untracked fallback when the
        // budget is exhausted.
        let mut buf = self.pool.acquire(file_size as usize).unwrap_or_default();
        let pooled = buf.capacity() > 0;

        let read = self.fs.read_into(path, &mut buf);
        let decoded = read
            .ok()
            .and_then(|_| image::load_from_memory(&buf).ok())
            .map(|img| finish_decode(img, target, file_size, path, true));

        if pooled {
            self.pool.release(buf, file_size as usize);
        }
        decoded
    }

    /// Decode from a read-only memory mapping of the file
    fn load_mapped(&self, path: &Path, target: Option<(u32, u32)>) -> Option<DecodedImage> {
        let file = File::open(path).ok()?;
        // Safety: read-only mapping, dropped before this decode returns
        let mmap = unsafe { Mmap::map(&file) }.ok()?;
        let file_size = mmap.len() as u64;

        image::load_from_memory(&mmap)
            .ok()
            .map(|img| finish_decode(img, target, file_size, path, false))
    }
}

/// Scale to target and convert to an RGBA artifact
fn finish_decode(
    img: image::DynamicImage,
    target: Option<(u32, u32)>,
    file_size: u64,
    path: &Path,
    fast_filter: bool,
) -> DecodedImage {
    let img = match target {
        Some((w, h)) if w < img.width() || h < img.height() => {
            if fast_filter {
                img.thumbnail(w, h)
            } else {
                img.resize(w, h, FilterType::CatmullRom)
            }
        }
        _ => img,
    };

    let (width, height) = img.dimensions();
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("unknown")
        .to_uppercase();

    DecodedImage::new(img.to_rgba8().into_raw(), width, height, file_size, &format)
}
