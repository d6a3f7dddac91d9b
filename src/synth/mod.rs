//! Software synthesis backend: FM voices, one-shot notes, shared low-pass.

pub mod envelope;
pub mod fm;
pub mod ramp;
pub mod util;

pub use fm::FmSynth;

/// Errors returned by synth primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthError {
    /// Sample rate is non-finite or not positive.
    InvalidSampleRate,
    /// Backend has not been started, or was shut down.
    NotReady,
    /// Command addressed a slot outside the voice pool.
    UnknownSlot { slot: usize, slots: usize },
}

impl std::fmt::Display for SynthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthError::InvalidSampleRate => write!(f, "invalid sample rate"),
            SynthError::NotReady => write!(f, "synth backend not ready"),
            SynthError::UnknownSlot { slot, slots } => {
                write!(f, "voice slot {slot} out of range (pool of {slots})")
            }
        }
    }
}

impl std::error::Error for SynthError {}
