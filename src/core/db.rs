//! dB helpers for synth gain staging.
//! Volumes are amplitude dB: 20*log10(·) one way, /20 the other.

/// Anything at or below this is treated as silence.
pub const SILENCE_DB: f32 = -120.0;

/// Convert dB to an amplitude ratio.
pub fn db_to_amp_ratio(db: f32) -> f32 {
    if db <= SILENCE_DB {
        return 0.0;
    }
    10.0_f32.powf(db / 20.0)
}

/// Convert amplitude ratio to dB (20*log10).
pub fn amp_to_db(a: f32) -> f32 {
    if a <= 0.0 {
        return SILENCE_DB;
    }
    (20.0 * a.log10()).max(SILENCE_DB)
}
