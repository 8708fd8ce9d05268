//! Fixed-frame noise suppression
//!
//! Frames are 480 samples (10 ms at 48 kHz). Sample values stay in the 16-bit
//! PCM range while they are floats; no normalization is applied.
//!
//! Lifecycle of a processor is plain ownership: construct it, call
//! [`FrameProcessor::process_frame`] as often as needed, drop it.

/// Samples per frame
pub const FRAME_SIZE: usize = 480;

/// A stateful per-frame noise suppressor
pub trait FrameProcessor {
    /// Denoise `input` into `out` and return the voice activity score.
    fn process_frame(
        &mut self,
        out: &mut [f32; FRAME_SIZE],
        input: &[f32; FRAME_SIZE],
    ) -> f32;
}

/// Run one 16-bit PCM frame through `processor`.
///
/// Output samples saturate at the `i16` bounds; the activity score is
/// clamped into `[0, 1]` (NaN becomes `0`).
pub fn denoise_pcm<P: FrameProcessor + ?Sized>(
    processor: &mut P,
    input: &[i16; FRAME_SIZE],
) -> ([i16; FRAME_SIZE], f32) {
    let samples: [f32; FRAME_SIZE] = input.map(f32::from);
    let mut processed = [0.0f32; FRAME_SIZE];
    let vad = processor.process_frame(&mut processed, &samples);

    // `as` saturates float-to-int and maps NaN to 0
    let output = processed.map(|s| s.round() as i16);
    let vad = if vad.is_nan() { 0.0 } else { vad.clamp(0.0, 1.0) };
    (output, vad)
}

#[cfg(feature = "rnnoise")]
pub use self::rnnoise::Denoiser;

#[cfg(feature = "rnnoise")]
mod rnnoise {
    use super::{FrameProcessor, FRAME_SIZE};
    use nnnoiseless::DenoiseState;

    /// RNNoise-backed suppressor
    pub struct Denoiser {
        state: Box<DenoiseState<'static>>,
    }

    impl Denoiser {
        pub fn new() -> Self {
            Self {
                state: DenoiseState::new(),
            }
        }
    }

    impl Default for Denoiser {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for Denoiser {
        fn fmt(
            &self,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            f.debug_struct("Denoiser").finish_non_exhaustive()
        }
    }

    impl FrameProcessor for Denoiser {
        fn process_frame(
            &mut self,
            out: &mut [f32; FRAME_SIZE],
            input: &[f32; FRAME_SIZE],
        ) -> f32 {
            self.state.process_frame(&mut out[..], &input[..])
        }
    }
}
