use std::collections::HashMap;

use tracing::{trace, warn};

use crate::core::timebase::Millis;
use crate::life::audio::backend::Backend;
use crate::life::audio::events::{OneShot, SlotId, SynthCommand, VoiceParam};
use crate::life::audio::scheduler::DelayQueue;
use crate::life::particle::ParticleId;

pub const MAX_VOICES: usize = 16;
/// Time between release and freeing a slot's backend resources.
pub const TEARDOWN_DELAY_MS: Millis = 1200.0;
pub const CHORD_STAGGER_MS: Millis = 60.0;

/// Ascending C-major pentatonic-ish ladder; low loss sits at the top.
pub const VOICE_SCALE_HZ: [f32; 13] = [
    130.81, 146.83, 164.81, 196.0, 220.0, 261.63, 293.66, 329.63, 392.0, 440.0, 523.25, 587.33,
    659.25,
];
pub const SPAWN_BLIP_HZ: [f32; 5] = [261.63, 293.66, 329.63, 392.0, 440.0];
pub const CONVERGE_CHORD_HZ: [f32; 3] = [261.63, 329.63, 392.0];

pub const START_VOLUME_DB: f32 = -32.0;
pub const START_MOD_INDEX: f32 = 0.3;
pub const START_FILTER_CUTOFF_HZ: f32 = 1200.0;

const VOLUME_BASE_DB: f32 = -38.0;
const VOLUME_DB_PER_SPEED: f32 = 2.0;
const VOLUME_MAX_BOOST_DB: f32 = 8.0;
const MOD_BASE: f32 = 0.2;
const MOD_PER_GRADIENT: f32 = 0.03;
const MOD_MAX_BOOST: f32 = 0.6;
const CUTOFF_BASE_HZ: f32 = 600.0;
const CUTOFF_HZ_PER_SPEED: f32 = 40.0;
const CUTOFF_MAX_BOOST_HZ: f32 = 400.0;

const PAN_RAMP_SEC: f32 = 0.2;
const FREQ_RAMP_SEC: f32 = 0.3;
const VOLUME_RAMP_SEC: f32 = 0.2;
const MOD_RAMP_SEC: f32 = 0.3;
const CUTOFF_RAMP_SEC: f32 = 0.2;

/// Pan from a horizontal position normalized to [0, 1].
pub fn pan_for(norm_x: f64) -> f32 {
    ((norm_x * 2.0 - 1.0) as f32).clamp(-1.0, 1.0)
}

/// Nearest scale note for a starting voice.
pub fn scale_note_hz(norm_loss: f64) -> f32 {
    let last = VOICE_SCALE_HZ.len() - 1;
    let idx = ((1.0 - norm_loss.clamp(0.0, 1.0)) * last as f64).round() as usize;
    VOICE_SCALE_HZ[idx.min(last)]
}

/// Frequency glided linearly between the two bracketing scale notes.
pub fn interpolated_pitch_hz(norm_loss: f64) -> f32 {
    let last = VOICE_SCALE_HZ.len() - 1;
    let pos = (1.0 - norm_loss.clamp(0.0, 1.0)) * last as f64;
    let low = (pos.floor() as usize).min(last);
    let high = (low + 1).min(last);
    let frac = (pos - low as f64) as f32;
    VOICE_SCALE_HZ[low] * (1.0 - frac) + VOICE_SCALE_HZ[high] * frac
}

pub fn volume_db_for(speed: f64) -> f32 {
    VOLUME_BASE_DB + (speed as f32 * VOLUME_DB_PER_SPEED).min(VOLUME_MAX_BOOST_DB)
}

pub fn mod_index_for(gradient_mag: f64) -> f32 {
    MOD_BASE + (gradient_mag as f32 * MOD_PER_GRADIENT).min(MOD_MAX_BOOST)
}

pub fn cutoff_hz_for(speed: f64) -> f32 {
    CUTOFF_BASE_HZ + (speed as f32 * CUTOFF_HZ_PER_SPEED).min(CUTOFF_MAX_BOOST_HZ)
}

pub fn spawn_blip_hz(norm_y: f64) -> f32 {
    let last = SPAWN_BLIP_HZ.len() - 1;
    let idx = ((1.0 - norm_y.clamp(0.0, 1.0)) * last as f64).floor() as usize;
    SPAWN_BLIP_HZ[idx.min(last)]
}

/// Last values commanded to a voice, so ramps continue from where they were.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    pub pan: f32,
    pub freq_hz: f32,
    pub volume_db: f32,
    pub mod_index: f32,
}

#[derive(Debug, Clone, Copy)]
struct VoiceEntry {
    slot: SlotId,
    params: VoiceParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Active,
    /// Released, tail still sounding, teardown pending.
    Releasing,
}

/// Each claim bumps `epoch`; a teardown carrying an older epoch is stale.
#[derive(Debug, Clone, Copy)]
struct Slot {
    state: SlotState,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Deferred {
    Teardown { slot: SlotId, epoch: u64 },
    Note(OneShot),
}

/// Maps live particles onto a bounded pool of synth voices.
#[derive(Debug)]
pub struct VoiceManager {
    voices: HashMap<ParticleId, VoiceEntry>,
    slots: Vec<Slot>,
    deferred: DelayQueue<Deferred>,
    filter_cutoff_hz: f32,
}

impl Default for VoiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceManager {
    pub fn new() -> Self {
        Self::with_capacity(MAX_VOICES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voices: HashMap::with_capacity(capacity),
            slots: vec![
                Slot {
                    state: SlotState::Idle,
                    epoch: 0,
                };
                capacity
            ],
            deferred: DelayQueue::new(),
            filter_cutoff_hz: START_FILTER_CUTOFF_HZ,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    pub fn has_voice(&self, id: ParticleId) -> bool {
        self.voices.contains_key(&id)
    }

    pub fn params(&self, id: ParticleId) -> Option<VoiceParams> {
        self.voices.get(&id).map(|v| v.params)
    }

    pub fn slot_of(&self, id: ParticleId) -> Option<SlotId> {
        self.voices.get(&id).map(|v| v.slot)
    }

    /// Target of the shared low-pass, as last written by any voice.
    pub fn filter_cutoff_hz(&self) -> f32 {
        self.filter_cutoff_hz
    }

    pub fn pending_teardowns(&self) -> usize {
        self.deferred
            .iter()
            .filter(|d| matches!(d, Deferred::Teardown { .. }))
            .count()
    }

    pub fn pending_notes(&self) -> usize {
        self.deferred
            .iter()
            .filter(|d| matches!(d, Deferred::Note(_)))
            .count()
    }

    /// Prefer slots whose tail has finished; fall back to one still releasing.
    fn free_slot(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::Idle)
            .or_else(|| {
                self.slots
                    .iter()
                    .position(|s| s.state == SlotState::Releasing)
            })
    }

    /// Claim a voice for `id`. No-op returning false when the backend is not
    /// ready, the pool is full, or `id` already sounds.
    pub fn start_voice<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: ParticleId,
        norm_x: f64,
        norm_loss: f64,
    ) -> bool {
        if !backend.is_ready() || self.voices.len() >= self.capacity() || self.voices.contains_key(&id)
        {
            return false;
        }
        let Some(slot) = self.free_slot() else {
            return false;
        };

        let params = VoiceParams {
            pan: pan_for(norm_x),
            freq_hz: scale_note_hz(norm_loss),
            volume_db: START_VOLUME_DB,
            mod_index: START_MOD_INDEX,
        };
        let cmd = SynthCommand::StartVoice {
            slot,
            freq_hz: params.freq_hz,
            pan: params.pan,
            volume_db: params.volume_db,
            mod_index: params.mod_index,
        };
        if let Err(err) = backend.submit(cmd) {
            warn!("start_voice: particle {id} slot {slot}: {err}");
            return false;
        }

        let s = &mut self.slots[slot];
        s.state = SlotState::Active;
        s.epoch += 1;
        self.voices.insert(id, VoiceEntry { slot, params });
        true
    }

    /// Ramp every mapped parameter toward the particle's current state.
    pub fn update_voice<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: ParticleId,
        norm_x: f64,
        norm_loss: f64,
        speed: f64,
        gradient_mag: f64,
    ) {
        let Some(entry) = self.voices.get_mut(&id) else {
            return;
        };
        if !backend.is_ready() {
            return;
        }
        let slot = entry.slot;
        let target = VoiceParams {
            pan: pan_for(norm_x),
            freq_hz: interpolated_pitch_hz(norm_loss),
            volume_db: volume_db_for(speed),
            mod_index: mod_index_for(gradient_mag),
        };
        let ramps = [
            (VoiceParam::Pan, target.pan, PAN_RAMP_SEC),
            (VoiceParam::FrequencyHz, target.freq_hz, FREQ_RAMP_SEC),
            (VoiceParam::VolumeDb, target.volume_db, VOLUME_RAMP_SEC),
            (VoiceParam::ModulationIndex, target.mod_index, MOD_RAMP_SEC),
        ];
        for (param, value, ramp_sec) in ramps {
            let cmd = SynthCommand::RampVoice {
                slot,
                param,
                target: value,
                ramp_sec,
            };
            if let Err(err) = backend.submit(cmd) {
                trace!("update_voice: particle {id} {param:?}: {err}");
            }
        }
        entry.params = target;

        // One low-pass for the whole ensemble: last writer wins.
        self.filter_cutoff_hz = cutoff_hz_for(speed);
        let cmd = SynthCommand::RampFilterCutoff {
            target_hz: self.filter_cutoff_hz,
            ramp_sec: CUTOFF_RAMP_SEC,
        };
        if let Err(err) = backend.submit(cmd) {
            trace!("update_voice: filter cutoff: {err}");
        }
    }

    /// Release `id`'s voice now and free its slot after the release tail.
    /// The id leaves the table immediately; a second call is a no-op.
    ///
    /// The bookkeeping runs even when the backend is not ready, so the id
    /// can be given a voice again and the slot is still reclaimed; only the
    /// release command is skipped.
    pub fn stop_voice<B: Backend + ?Sized>(
        &mut self,
        backend: &mut B,
        id: ParticleId,
        now_ms: Millis,
    ) {
        let Some(entry) = self.voices.remove(&id) else {
            return;
        };
        self.release_slot(backend, entry.slot, now_ms);
    }

    /// Release every voice and empty the table.
    pub fn stop_all<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) {
        let mut slots: Vec<SlotId> = self.voices.drain().map(|(_, v)| v.slot).collect();
        slots.sort_unstable();
        for slot in slots {
            self.release_slot(backend, slot, now_ms);
        }
    }

    fn release_slot<B: Backend + ?Sized>(&mut self, backend: &mut B, slot: SlotId, now_ms: Millis) {
        let s = &mut self.slots[slot];
        s.state = SlotState::Releasing;
        let epoch = s.epoch;
        if backend.is_ready() {
            if let Err(err) = backend.submit(SynthCommand::ReleaseVoice { slot }) {
                warn!("release slot {slot}: {err}");
            }
        }
        self.deferred
            .schedule(now_ms + TEARDOWN_DELAY_MS, Deferred::Teardown { slot, epoch });
    }

    /// Short blip pitched by where the spawn happened (top = high).
    pub fn play_spawn_blip<B: Backend + ?Sized>(&mut self, backend: &mut B, norm_y: f64) {
        if !backend.is_ready() {
            return;
        }
        let cmd = SynthCommand::Trigger(OneShot::SpawnBlip {
            freq_hz: spawn_blip_hz(norm_y),
        });
        if let Err(err) = backend.submit(cmd) {
            trace!("spawn blip: {err}");
        }
    }

    /// Arpeggiated resolving chord; the first note sounds now.
    pub fn play_converge_chord<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) {
        if !backend.is_ready() {
            return;
        }
        for (i, &freq_hz) in CONVERGE_CHORD_HZ.iter().enumerate() {
            let note = OneShot::ConvergeNote { freq_hz };
            if i == 0 {
                if let Err(err) = backend.submit(SynthCommand::Trigger(note)) {
                    trace!("converge chord: {err}");
                }
            } else {
                self.deferred
                    .schedule(now_ms + i as f64 * CHORD_STAGGER_MS, Deferred::Note(note));
            }
        }
    }

    /// Run deferred work that has come due. Teardown failures are logged and
    /// dropped; a teardown whose slot was reclaimed since is skipped.
    pub fn pump<B: Backend + ?Sized>(&mut self, backend: &mut B, now_ms: Millis) {
        while let Some(task) = self.deferred.pop_due(now_ms) {
            match task {
                Deferred::Teardown { slot, epoch } => {
                    let s = self.slots[slot];
                    if s.epoch != epoch || s.state != SlotState::Releasing {
                        trace!("slot {slot}: stale teardown (epoch {epoch}, now {})", s.epoch);
                        continue;
                    }
                    if backend.is_ready() {
                        if let Err(err) = backend.submit(SynthCommand::DisposeVoice { slot }) {
                            warn!("dispose slot {slot}: {err}");
                        }
                    }
                    self.slots[slot].state = SlotState::Idle;
                }
                Deferred::Note(note) => {
                    if !backend.is_ready() {
                        continue;
                    }
                    if let Err(err) = backend.submit(SynthCommand::Trigger(note)) {
                        trace!("deferred note: {err}");
                    }
                }
            }
        }
    }
}
