//! Decoded image artifacts shared between cache layers.

use std::sync::Arc;

/// A fully decoded image, ready for display.
///
/// Artifacts are produced by the decode pipeline and shared between the hot
/// cache and any waiting request handles via `Arc`, so a cache hit never
/// copies pixel data.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Raw pixel data (RGBA, row-major)
    pub rgba: Vec<u8>,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Size of the source file in bytes
    pub source_bytes: u64,

    /// Source format name (e.g. "JPEG", "PNG")
    pub format: String,
}

impl DecodedImage {
    /// Create a new decoded image
    pub fn new(rgba: Vec<u8>, width: u32, height: u32, source_bytes: u64, format: &str) -> Self {
        Self {
            rgba,
            width,
            height,
            source_bytes,
            format: format.to_string(),
        }
    }

    /// Resident memory footprint of this artifact in bytes
    pub fn mem_size(&self) -> usize {
        self.rgba.len()
    }

    /// Total pixel count
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Shared handle to a decoded artifact
pub type ImageHandle = Arc<DecodedImage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_size_tracks_pixel_buffer() {
        let image = DecodedImage::new(vec![0u8; 64 * 64 * 4], 64, 64, 1024, "PNG");
        assert_eq!(image.mem_size(), 64 * 64 * 4);
        assert_eq!(image.pixel_count(), 64 * 64);
    }
}
