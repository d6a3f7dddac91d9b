//! Linear ADSR envelope, advanced per sample.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack_sec: f32,
    pub decay_sec: f32,
    pub sustain: f32,
    pub release_sec: f32,
}

impl AdsrParams {
    /// Slow-breathing pad used by particle voices.
    pub const VOICE: AdsrParams = AdsrParams {
        attack_sec: 0.4,
        decay_sec: 0.2,
        sustain: 0.7,
        release_sec: 1.2,
    };
    pub const SPAWN_BLIP: AdsrParams = AdsrParams {
        attack_sec: 0.05,
        decay_sec: 0.3,
        sustain: 0.0,
        release_sec: 0.2,
    };
    pub const CONVERGE_NOTE: AdsrParams = AdsrParams {
        attack_sec: 0.02,
        decay_sec: 0.4,
        sustain: 0.1,
        release_sec: 0.8,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy)]
pub struct Adsr {
    params: AdsrParams,
    stage: Stage,
    level: f32,
    attack_step: f32,
    decay_step: f32,
    release_step: f32,
}

impl Adsr {
    pub fn new(params: AdsrParams, fs: f32) -> Self {
        let per_sample = |sec: f32| {
            let n = (sec * fs).max(1.0);
            1.0 / n
        };
        let sustain = params.sustain.clamp(0.0, 1.0);
        Self {
            params: AdsrParams { sustain, ..params },
            stage: Stage::Idle,
            level: 0.0,
            attack_step: per_sample(params.attack_sec),
            decay_step: (1.0 - sustain) * per_sample(params.decay_sec),
            release_step: 0.0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Start (or restart) from the current level, so retriggers do not click.
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    /// Fade to silence over the release time, from wherever the level is.
    pub fn gate_off(&mut self, fs: f32) {
        if self.stage == Stage::Idle {
            return;
        }
        let n = (self.params.release_sec * fs).max(1.0);
        self.release_step = self.level / n;
        self.stage = Stage::Release;
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    #[inline]
    pub fn tick(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.params.sustain {
                    self.level = self.params.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {}
            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 || self.release_step <= 0.0 {
                    self.reset();
                }
            }
        }
        self.level
    }
}
