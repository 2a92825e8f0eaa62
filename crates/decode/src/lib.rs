//! Lightbox decode library
//!
//! Decode-request classification, strategy selection with fallback, and
//! progressive multi-stage decode for very large images. Platform seams
//! (native decoder) live here; filesystem and remote-detection seams come
//! from `lightbox-cache`.

pub mod decoder;
pub mod progressive;
pub mod request;
pub mod strategy;

pub use decoder::{DecodeOptions, ImageCrateDecoder, NativeImageDecoder};
pub use progressive::{run_progressive, ProgressiveDecode, ProgressiveStage, STAGE_FRACTIONS};
pub use request::{
    apply_overscale, classify, overscale_for, DecodeCategory, DecodeRequest, DecodeResult,
    RequestPriority,
};
pub use strategy::{DecodeStrategyKind, StrategySelector, FALLBACK_CHAIN};
