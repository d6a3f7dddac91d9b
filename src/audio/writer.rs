use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::debug;

pub const CHANNELS: u16 = 2;

/// Drains interleaved stereo blocks from `rx` into a 16-bit WAV file until
/// every sender is dropped.
pub struct WavOutput;

impl WavOutput {
    pub fn run(
        rx: Receiver<Arc<[f32]>>,
        path: PathBuf,
        sample_rate: u32,
    ) -> JoinHandle<Result<u64, hound::Error>> {
        std::thread::spawn(move || {
            let spec = WavSpec {
                channels: CHANNELS,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut writer = WavWriter::create(&path, spec)?;
            let mut written = 0u64;

            while let Ok(samples) = rx.recv() {
                for &s in samples.iter() {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    writer.write_sample(v)?;
                }
                written += samples.len() as u64;
            }

            writer.finalize()?;
            debug!("Wrote {} frames to {}", written / CHANNELS as u64, path.display());
            Ok(written / CHANNELS as u64)
        })
    }
}
