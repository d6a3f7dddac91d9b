/// Wall-clock milliseconds as seen by the tick loop.
pub type Millis = f64;

/// Ties the frame-driven simulation clock to the audio sample clock.
#[derive(Clone, Copy, Debug)]
pub struct Timebase {
    pub fs: f32,
    pub frame_rate: f32,
}

impl Timebase {
    pub fn frame_to_ms(&self, frame: u64) -> Millis {
        if self.frame_rate <= 0.0 {
            return 0.0;
        }
        frame as f64 * 1000.0 / self.frame_rate as f64
    }

    /// Samples rendered between the start of `frame` and the start of the next.
    /// Computed from absolute positions so rounding never drifts.
    pub fn samples_in_frame(&self, frame: u64) -> usize {
        if self.frame_rate <= 0.0 {
            return 0;
        }
        let per_frame = self.fs as f64 / self.frame_rate as f64;
        let start = (frame as f64 * per_frame).round() as u64;
        let end = ((frame + 1) as f64 * per_frame).round() as u64;
        end.saturating_sub(start) as usize
    }

    pub fn frames_for_duration(&self, duration_sec: f32) -> u64 {
        if duration_sec <= 0.0 || self.frame_rate <= 0.0 {
            return 0;
        }
        (duration_sec as f64 * self.frame_rate as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::Timebase;

    #[test]
    fn frame_clock_in_millis() {
        let tb = Timebase {
            fs: 48_000.0,
            frame_rate: 60.0,
        };
        assert_eq!(tb.frame_to_ms(0), 0.0);
        assert!((tb.frame_to_ms(3) - 50.0).abs() < 1e-9);
        assert_eq!(tb.frames_for_duration(2.0), 120);
    }

    #[test]
    fn frame_sample_counts_sum_exactly() {
        let tb = Timebase {
            fs: 44_100.0,
            frame_rate: 60.0,
        };
        let total: usize = (0..60).map(|f| tb.samples_in_frame(f)).sum();
        assert_eq!(total, 44_100);
    }
}
