/// Index into the backend's fixed pool of voice slots.
pub type SlotId = usize;

/// Continuously rampable per-voice parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceParam {
    /// Stereo position in [-1, 1].
    Pan,
    FrequencyHz,
    VolumeDb,
    /// FM modulation depth.
    ModulationIndex,
}

/// Fire-and-forget notes not bound to any particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OneShot {
    SpawnBlip { freq_hz: f32 },
    ConvergeNote { freq_hz: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthCommand {
    /// (Re)initialize a slot and trigger its attack.
    StartVoice {
        slot: SlotId,
        freq_hz: f32,
        pan: f32,
        volume_db: f32,
        mod_index: f32,
    },
    RampVoice {
        slot: SlotId,
        param: VoiceParam,
        target: f32,
        ramp_sec: f32,
    },
    /// The low-pass stage shared by every voice.
    RampFilterCutoff { target_hz: f32, ramp_sec: f32 },
    ReleaseVoice { slot: SlotId },
    /// Free whatever the backend holds for the slot.
    DisposeVoice { slot: SlotId },
    Trigger(OneShot),
}
