//! PCM16 audio framing.
//!
//! Audio crossing the relay is raw PCM 16-bit signed little-endian mono.
//! The relay never resamples or transcodes; it only validates framing and
//! batches outbound audio (see [`OutboundAudioBuffer`]).
//!
//! Inbound (client → upstream) frames are forwarded one by one, since clients
//! already send appropriately sized frames. Outbound (upstream → client) audio
//! is accumulated until a minimum flush threshold is reached.

mod buffer;

pub use buffer::OutboundAudioBuffer;

use thiserror::Error;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Default sample rate of client → upstream audio (Hz).
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate of upstream → client audio (Hz).
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Default outbound flush threshold: 200 ms of 24 kHz PCM16 mono.
pub const DEFAULT_MIN_FLUSH_BYTES: usize = bytes_for_duration(DEFAULT_OUTPUT_SAMPLE_RATE, 200);

/// Reasons an audio frame is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioFrameError {
    #[error("Empty audio frame")]
    Empty,

    #[error("Audio frame has odd length {0}; PCM16 requires whole samples")]
    OddLength(usize),

    #[error("Audio frame of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },
}

/// Validate a PCM16 frame: non-empty, whole samples, within `max_bytes`.
pub fn validate_frame(frame: &[u8], max_bytes: usize) -> Result<(), AudioFrameError> {
    if frame.is_empty() {
        return Err(AudioFrameError::Empty);
    }
    if frame.len() % BYTES_PER_SAMPLE != 0 {
        return Err(AudioFrameError::OddLength(frame.len()));
    }
    if frame.len() > max_bytes {
        return Err(AudioFrameError::TooLarge {
            size: frame.len(),
            max: max_bytes,
        });
    }
    Ok(())
}

/// Number of bytes holding `duration_ms` of PCM16 mono audio at `sample_rate`.
pub const fn bytes_for_duration(sample_rate: u32, duration_ms: u32) -> usize {
    (sample_rate as usize * duration_ms as usize / 1000) * BYTES_PER_SAMPLE
}
