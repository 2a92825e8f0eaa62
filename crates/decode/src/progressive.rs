//! Progressive multi-stage decode for ultra-high-pixel images
//!
//! Very large images are decoded in up to three stages of increasing
//! resolution (10%, 25%, 50% of full size) so the consumer can render
//! improving previews without blocking for final quality. Stages form a
//! finite, ordered, non-restartable sequence delivered to a caller-supplied
//! sink; the channel wrapper turns the sink into a bounded producer the
//! consumer can drain lazily, observing intermediates or awaiting only the
//! final stage.

use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use lightbox_cache::ImageHandle;

use crate::decoder::{DecodeOptions, NativeImageDecoder};

/// Resolution fractions for the progressive stages
pub const STAGE_FRACTIONS: [f64; 3] = [0.10, 0.25, 0.50];

/// One emitted progressive stage
#[derive(Debug, Clone)]
pub struct ProgressiveStage {
    /// Stage number, starting at 1
    pub stage: u8,

    /// Fraction of full resolution this stage was decoded at
    pub fraction: f64,

    /// The decoded preview artifact
    pub image: ImageHandle,
}

/// Run a progressive decode, delivering stages to `sink`.
///
/// Stage 3 (50%) is emitted only when the requested target area exceeds
/// `stage_threshold` pixels — below that, stage 2 already saturates the
/// display. The sink returns `false` to stop early (e.g. the consumer went
/// away). Returns the number of stages emitted.
pub fn run_progressive(
    decoder: &dyn NativeImageDecoder,
    path: &Path,
    full_dims: (u32, u32),
    target: Option<(u32, u32)>,
    stage_threshold: u64,
    sink: &mut dyn FnMut(ProgressiveStage) -> bool,
) -> u8 {
    let (full_w, full_h) = full_dims;
    let target_area = target
        .map(|(w, h)| w as u64 * h as u64)
        .unwrap_or(full_w as u64 * full_h as u64);

    let options = DecodeOptions {
        prefer_thumbnail: true,
        memory_priority: true,
    };

    let mut emitted = 0u8;
    for (i, fraction) in STAGE_FRACTIONS.iter().enumerate() {
        let stage = (i + 1) as u8;
        if stage == 3 && target_area <= stage_threshold {
            break;
        }

        let stage_dims = (
            ((full_w as f64 * fraction).round() as u32).max(1),
            ((full_h as f64 * fraction).round() as u32).max(1),
        );

        match decoder.decode(path, Some(stage_dims), &options) {
            Some(image) => {
                emitted = stage;
                let keep_going = sink(ProgressiveStage {
                    stage,
                    fraction: *fraction,
                    image: Arc::new(image),
                });
                if !keep_going {
                    break;
                }
            }
            None => break,
        }
    }
    emitted
}

/// Consumer side of a channel-backed progressive decode.
///
/// Iterates the emitted stages in order; the sequence is finite (at most
/// three elements) and cannot be restarted.
pub struct ProgressiveDecode {
    rx: Receiver<ProgressiveStage>,
}

impl ProgressiveDecode {
    /// Create a bounded producer/consumer pair for progressive stages.
    ///
    /// The producer side is a plain sender suitable for use inside a
    /// `run_progressive` sink running on a worker thread.
    pub fn pair() -> (SyncSender<ProgressiveStage>, ProgressiveDecode) {
        let (tx, rx) = sync_channel(STAGE_FRACTIONS.len());
        (tx, ProgressiveDecode { rx })
    }

    /// Block until the next stage, or `None` when the producer is done
    pub fn next_stage(&self) -> Option<ProgressiveStage> {
        self.rx.recv().ok()
    }

    /// Drain the sequence, returning only the final stage
    pub fn final_stage(&self) -> Option<ProgressiveStage> {
        let mut last = None;
        while let Some(stage) = self.next_stage() {
            last = Some(stage);
        }
        last
    }
}

impl Iterator for ProgressiveDecode {
    type Item = ProgressiveStage;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
