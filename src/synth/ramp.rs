/// Linear parameter glide toward a target over a fixed number of samples.
/// Retargeting mid-glide starts from wherever the value currently is.
#[derive(Debug, Clone, Copy)]
pub struct Ramp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl Ramp {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    pub fn set_immediate(&mut self, value: f32) {
        *self = Self::new(value);
    }

    pub fn ramp_to(&mut self, target: f32, len: usize) {
        if !target.is_finite() {
            return;
        }
        if len == 0 {
            self.set_immediate(target);
            return;
        }
        self.target = target;
        self.step = (target - self.current) / len as f32;
        self.remaining = len;
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }

    /// Advance one sample and return the new value.
    #[inline]
    pub fn tick(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }
}
