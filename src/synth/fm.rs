use std::f32::consts::TAU;

use crate::core::db::db_to_amp_ratio;
use crate::life::audio::backend::Backend;
use crate::life::audio::events::{OneShot, SlotId, SynthCommand, VoiceParam};
use crate::life::audio::voice_manager::{MAX_VOICES, START_FILTER_CUTOFF_HZ};
use crate::synth::SynthError;
use crate::synth::envelope::{Adsr, AdsrParams};
use crate::synth::ramp::Ramp;
use crate::synth::util::{flush_denorm, one_pole_coeff, pan_gains};

/// Modulator runs at this multiple of the carrier.
const HARMONICITY: f32 = 2.0;
const SPAWN_BLIP_DB: f32 = -24.0;
const SPAWN_BLIP_HOLD_SEC: f32 = 0.2;
const CONVERGE_NOTE_DB: f32 = -18.0;
const CONVERGE_NOTE_HOLD_SEC: f32 = 0.5;
/// Cap on simultaneously ringing one-shots; the oldest is dropped beyond it.
const MAX_ONE_SHOTS: usize = 32;

#[inline]
fn wrap_phase(phase: f32) -> f32 {
    if phase >= TAU { phase - TAU } else { phase }
}

/// Two-operator FM voice bound to one slot.
#[derive(Debug, Clone)]
struct FmVoice {
    env: Adsr,
    carrier_phase: f32,
    mod_phase: f32,
    freq_hz: Ramp,
    mod_index: Ramp,
    volume_db: Ramp,
    pan: Ramp,
}

impl FmVoice {
    fn silent(fs: f32) -> Self {
        Self {
            env: Adsr::new(AdsrParams::VOICE, fs),
            carrier_phase: 0.0,
            mod_phase: 0.0,
            freq_hz: Ramp::new(440.0),
            mod_index: Ramp::new(0.0),
            volume_db: Ramp::new(-120.0),
            pan: Ramp::new(0.0),
        }
    }

    fn param_mut(&mut self, param: VoiceParam) -> &mut Ramp {
        match param {
            VoiceParam::Pan => &mut self.pan,
            VoiceParam::FrequencyHz => &mut self.freq_hz,
            VoiceParam::VolumeDb => &mut self.volume_db,
            VoiceParam::ModulationIndex => &mut self.mod_index,
        }
    }

    #[inline]
    fn tick(&mut self, fs: f32) -> (f32, f32) {
        let env = self.env.tick();
        let freq = self.freq_hz.tick();
        let index = self.mod_index.tick();
        let gain = db_to_amp_ratio(self.volume_db.tick());
        let pan = self.pan.tick();
        if self.env.is_idle() {
            return (0.0, 0.0);
        }

        let modulator = self.mod_phase.sin();
        let s = (self.carrier_phase + index * modulator).sin() * env * gain;
        self.carrier_phase = wrap_phase(self.carrier_phase + TAU * freq / fs);
        self.mod_phase = wrap_phase(self.mod_phase + TAU * freq * HARMONICITY / fs);

        let (l, r) = pan_gains(pan);
        (s * l, s * r)
    }
}

/// Sine note with its own envelope, held for a fixed time then released.
#[derive(Debug, Clone)]
struct OneShotVoice {
    env: Adsr,
    phase: f32,
    freq_hz: f32,
    gain: f32,
    hold_samples: usize,
}

impl OneShotVoice {
    #[inline]
    fn tick(&mut self, fs: f32) -> f32 {
        if self.hold_samples > 0 {
            self.hold_samples -= 1;
            if self.hold_samples == 0 {
                self.env.gate_off(fs);
            }
        }
        let env = self.env.tick();
        let s = self.phase.sin() * env * self.gain;
        self.phase = wrap_phase(self.phase + TAU * self.freq_hz / fs);
        s
    }
}

/// Stereo FM synth with a fixed voice pool and one low-pass on the voice bus.
#[derive(Debug)]
pub struct FmSynth {
    fs: f32,
    ready: bool,
    voices: Vec<FmVoice>,
    one_shots: Vec<OneShotVoice>,
    cutoff_hz: Ramp,
    lp_state: (f32, f32),
    master_gain: f32,
}

impl FmSynth {
    pub fn new(fs: f32) -> Result<Self, SynthError> {
        Self::with_voices(fs, MAX_VOICES)
    }

    pub fn with_voices(fs: f32, voices: usize) -> Result<Self, SynthError> {
        if !fs.is_finite() || fs <= 0.0 {
            return Err(SynthError::InvalidSampleRate);
        }
        Ok(Self {
            fs,
            ready: false,
            voices: vec![FmVoice::silent(fs); voices],
            one_shots: Vec::new(),
            cutoff_hz: Ramp::new(START_FILTER_CUTOFF_HZ),
            lp_state: (0.0, 0.0),
            master_gain: 1.0,
        })
    }

    /// Bring the backend up. Until this is called every command fails with
    /// [`SynthError::NotReady`].
    pub fn start(&mut self) {
        self.ready = true;
    }

    /// Silence everything and go back to the not-ready state.
    pub fn shutdown(&mut self) {
        self.ready = false;
        for v in &mut self.voices {
            *v = FmVoice::silent(self.fs);
        }
        self.one_shots.clear();
        self.lp_state = (0.0, 0.0);
    }

    pub fn set_master_gain_db(&mut self, db: f32) {
        self.master_gain = db_to_amp_ratio(db);
    }

    /// Slots whose envelope is not idle, including release tails.
    pub fn sounding_voices(&self) -> usize {
        self.voices.iter().filter(|v| !v.env.is_idle()).count()
    }

    pub fn one_shots(&self) -> usize {
        self.one_shots.len()
    }

    pub fn cutoff_target_hz(&self) -> f32 {
        self.cutoff_hz.target()
    }

    fn voice_mut(&mut self, slot: SlotId) -> Result<&mut FmVoice, SynthError> {
        let slots = self.voices.len();
        self.voices
            .get_mut(slot)
            .ok_or(SynthError::UnknownSlot { slot, slots })
    }

    fn samples(&self, sec: f32) -> usize {
        if sec <= 0.0 {
            return 0;
        }
        (sec * self.fs).round() as usize
    }

    fn trigger(&mut self, shot: OneShot) {
        let (params, freq_hz, db, hold_sec) = match shot {
            OneShot::SpawnBlip { freq_hz } => {
                (AdsrParams::SPAWN_BLIP, freq_hz, SPAWN_BLIP_DB, SPAWN_BLIP_HOLD_SEC)
            }
            OneShot::ConvergeNote { freq_hz } => (
                AdsrParams::CONVERGE_NOTE,
                freq_hz,
                CONVERGE_NOTE_DB,
                CONVERGE_NOTE_HOLD_SEC,
            ),
        };
        let mut env = Adsr::new(params, self.fs);
        env.gate_on();
        if self.one_shots.len() >= MAX_ONE_SHOTS {
            self.one_shots.remove(0);
        }
        self.one_shots.push(OneShotVoice {
            env,
            phase: 0.0,
            freq_hz,
            gain: db_to_amp_ratio(db),
            hold_samples: self.samples(hold_sec).max(1),
        });
    }

    /// Render interleaved stereo frames into `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        let fs = self.fs;
        for frame in out.chunks_exact_mut(2) {
            let mut bus = (0.0f32, 0.0f32);
            for v in &mut self.voices {
                let (l, r) = v.tick(fs);
                bus.0 += l;
                bus.1 += r;
            }

            let a = one_pole_coeff(self.cutoff_hz.tick(), fs);
            self.lp_state.0 = flush_denorm(self.lp_state.0 + a * (bus.0 - self.lp_state.0));
            self.lp_state.1 = flush_denorm(self.lp_state.1 + a * (bus.1 - self.lp_state.1));

            let mut dry = 0.0f32;
            for shot in &mut self.one_shots {
                dry += shot.tick(fs);
            }

            frame[0] = (self.lp_state.0 + dry) * self.master_gain;
            frame[1] = (self.lp_state.1 + dry) * self.master_gain;
        }
        self.one_shots.retain(|s| !s.env.is_idle());
    }
}

impl Backend for FmSynth {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn init(&mut self) -> Result<(), SynthError> {
        self.start();
        Ok(())
    }

    fn submit(&mut self, cmd: SynthCommand) -> Result<(), SynthError> {
        if !self.ready {
            return Err(SynthError::NotReady);
        }
        match cmd {
            SynthCommand::StartVoice {
                slot,
                freq_hz,
                pan,
                volume_db,
                mod_index,
            } => {
                let v = self.voice_mut(slot)?;
                v.freq_hz.set_immediate(freq_hz);
                v.pan.set_immediate(pan);
                v.volume_db.set_immediate(volume_db);
                v.mod_index.set_immediate(mod_index);
                if v.env.is_idle() {
                    v.carrier_phase = 0.0;
                    v.mod_phase = 0.0;
                }
                v.env.gate_on();
            }
            SynthCommand::RampVoice {
                slot,
                param,
                target,
                ramp_sec,
            } => {
                let len = self.samples(ramp_sec);
                self.voice_mut(slot)?.param_mut(param).ramp_to(target, len);
            }
            SynthCommand::RampFilterCutoff {
                target_hz,
                ramp_sec,
            } => {
                let len = self.samples(ramp_sec);
                self.cutoff_hz.ramp_to(target_hz, len);
            }
            SynthCommand::ReleaseVoice { slot } => {
                let fs = self.fs;
                self.voice_mut(slot)?.env.gate_off(fs);
            }
            SynthCommand::DisposeVoice { slot } => {
                let fs = self.fs;
                *self.voice_mut(slot)? = FmVoice::silent(fs);
            }
            SynthCommand::Trigger(shot) => self.trigger(shot),
        }
        Ok(())
    }
}
