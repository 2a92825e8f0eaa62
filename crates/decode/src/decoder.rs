//! Native image decoder seam
//!
//! The pipeline decodes through the [`NativeImageDecoder`] trait so the
//! platform decoder can be swapped out (and so tests can count decode
//! invocations with a fake). The default implementation is backed by the
//! `image` crate.

use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;
use lightbox_cache::DecodedImage;

/// Options for a single decode invocation
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Prefer the fast thumbnail path (box filter) over exact resampling
    pub prefer_thumbnail: bool,

    /// Give this decode's allocations priority under memory pressure
    pub memory_priority: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            prefer_thumbnail: false,
            memory_priority: false,
        }
    }
}

/// Platform image decoder
pub trait NativeImageDecoder: Send + Sync {
    /// Image dimensions without a full decode, or `None` on failure
    fn probe(&self, path: &Path) -> Option<(u32, u32)>;

    /// Decode an image, optionally scaled to target dimensions.
    ///
    /// Returns `None` on any decode failure; the strategy selector handles
    /// fallback.
    fn decode(
        &self,
        path: &Path,
        target: Option<(u32, u32)>,
        options: &DecodeOptions,
    ) -> Option<DecodedImage>;
}

/// Default decoder backed by the `image` crate
#[derive(Debug, Default, Clone)]
pub struct ImageCrateDecoder;

impl NativeImageDecoder for ImageCrateDecoder {
    fn probe(&self, path: &Path) -> Option<(u32, u32)> {
        image::image_dimensions(path).ok()
    }

    fn decode(
        &self,
        path: &Path,
        target: Option<(u32, u32)>,
        options: &DecodeOptions,
    ) -> Option<DecodedImage> {
        let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let img = image::open(path).ok()?;

        let img = match target {
            Some((w, h)) if w < img.width() || h < img.height() => {
                if options.prefer_thumbnail {
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

        Some(DecodedImage::new(
            img.to_rgba8().into_raw(),
            width,
            height,
            file_size,
            &format,
        ))
    }
}
